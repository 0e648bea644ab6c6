//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals and
//! computations. It owns the dependency graph and flushes updates when
//! signals change.
//!
//! # How It Works
//!
//! 1. Signals and computations register with the runtime through a
//!    [`Scope`].
//!
//! 2. When a computation runs, the reactive context records every signal it
//!    reads and buffers every signal it writes. Afterwards the runtime
//!    replaces the computation's read-set, checks for cycles and commits the
//!    buffered writes.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Marks the readers dirty
//!    b. Flushes at once, unless a batch is open, a flush is already running
//!       or a computation is still executing
//!    c. Runs every affected computation once per round, suppliers first
//!
//! # Thread Safety
//!
//! The graph lives behind a `parking_lot::Mutex` so handles are `Send` and
//! `Sync`, but the engine assumes a single logical owner: the lock is never
//! held while user code runs, and the tracking context is thread-local.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{trace, warn};

use super::context::ReactiveContext;
use super::scope::Scope;
use crate::config::RuntimeConfig;
use crate::error::{ReactiveError, Result};
use crate::graph::{Body, Cleanup, NodeId, UpdateScheduler};

struct RuntimeInner {
    id: NodeId,
    config: RuntimeConfig,
    graph: Mutex<UpdateScheduler>,
}

/// Handle to a reactive runtime. Cloning shares the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                id: NodeId::new(),
                config,
                graph: Mutex::new(UpdateScheduler::new()),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Create a new root scope.
    pub fn scope(&self) -> Scope {
        let id = self.graph().add_root_scope();
        Scope::from_parts(id, self.clone())
    }

    /// Run `f` with writes grouped into a single flush.
    ///
    /// Batches nest; only the outermost one flushes.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.graph().begin_batch();
        let guard = BatchGuard { runtime: self };
        let result = f();
        drop(guard);
        self.maybe_flush()?;
        Ok(result)
    }

    /// Run `f` without recording reads into the running computation.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _ctx = ReactiveContext::untracked(self.id());
        f()
    }

    /// Flush pending updates now.
    ///
    /// Does nothing inside a batch, inside a running computation, or while
    /// another flush is in progress: the pending work is folded into that
    /// one instead.
    pub fn flush(&self) -> Result<()> {
        if ReactiveContext::current_computation(self.id()).is_some() {
            return Ok(());
        }
        {
            let mut graph = self.graph();
            if graph.is_flushing() || graph.batch_depth() > 0 {
                return Ok(());
            }
            graph.begin_flush();
        }

        let _flush = FlushGuard { runtime: self };
        self.flush_rounds()
    }

    pub fn is_flushing(&self) -> bool {
        self.graph().is_flushing()
    }

    /// Number of live signals.
    pub fn signal_count(&self) -> usize {
        self.graph().signal_count()
    }

    /// Number of live computations.
    pub fn computation_count(&self) -> usize {
        self.graph().computation_count()
    }

    // ------------------------------------------------------------------
    // Crate-internal plumbing used by signals, computations and scopes
    // ------------------------------------------------------------------

    pub(crate) fn id(&self) -> NodeId {
        self.inner.id
    }

    pub(crate) fn graph(&self) -> MutexGuard<'_, UpdateScheduler> {
        self.inner.graph.lock()
    }

    /// The running computation if any, otherwise `scope`.
    pub(crate) fn current_owner(&self, scope: NodeId) -> NodeId {
        ReactiveContext::current_computation(self.id()).unwrap_or(scope)
    }

    /// Check a signal is alive and record the read.
    pub(crate) fn track_read(&self, signal: NodeId) -> Result<()> {
        self.ensure_signal(signal)?;
        ReactiveContext::track_read(self.id(), signal);
        Ok(())
    }

    pub(crate) fn ensure_signal(&self, signal: NodeId) -> Result<()> {
        if self.graph().contains_signal(signal) {
            Ok(())
        } else {
            Err(ReactiveError::DisposedAccess { node: signal })
        }
    }

    /// Record a committed change and flush if nothing holds it back.
    pub(crate) fn signal_changed(&self, signal: NodeId) -> Result<()> {
        self.graph().signal_changed(signal)?;
        self.maybe_flush()
    }

    pub(crate) fn maybe_flush(&self) -> Result<()> {
        {
            let graph = self.graph();
            if graph.batch_depth() > 0 || graph.is_flushing() || !graph.has_pending() {
                return Ok(());
            }
        }
        self.flush()
    }

    pub(crate) fn add_cleanup(&self, owner: NodeId, cleanup: Cleanup) -> Result<()> {
        self.graph().add_cleanup(owner, cleanup)
    }

    /// Create a computation and run it for the first time.
    ///
    /// If the first run fails the computation is disposed and the error is
    /// returned.
    pub(crate) fn create_computation(&self, scope: NodeId, body: Body) -> Result<NodeId> {
        let owner = self.current_owner(scope);
        let id = self.graph().add_computation(owner, body)?;

        if let Err(err) = self.run_computation(id) {
            self.dispose_owner(id);
            return Err(err);
        }
        self.maybe_flush()?;
        Ok(id)
    }

    /// Dispose a scope or computation and everything it owns, then run the
    /// collected cleanups.
    pub(crate) fn dispose_owner(&self, id: NodeId) {
        let cleanups = self.graph().dispose_owner(id);
        if cleanups.is_empty() {
            return;
        }

        trace!(node = %id, cleanups = cleanups.len(), "running cleanups");
        {
            let _ctx = ReactiveContext::untracked(self.id());
            for cleanup in cleanups {
                cleanup();
            }
        }
        if let Err(err) = self.maybe_flush() {
            warn!(node = %id, error = %err, "flush after disposal failed");
        }
    }

    pub(crate) fn dispose_signal(&self, id: NodeId) {
        self.graph().remove_signal(id);
    }

    /// Run one computation: tear down what its last run created, execute the
    /// body under tracking, rewire its edges and commit its writes.
    ///
    /// Errors are recorded on the computation and returned; they never
    /// escape into the surrounding flush.
    pub(crate) fn run_computation(&self, id: NodeId) -> Result<()> {
        let (body, cleanups) = {
            let mut graph = self.graph();
            let body = graph
                .computation(id)
                .map(|node| node.body())
                .ok_or(ReactiveError::DisposedAccess { node: id })?;
            (body, graph.reset_owner(id))
        };

        if !cleanups.is_empty() {
            let _ctx = ReactiveContext::untracked(self.id());
            for cleanup in cleanups {
                cleanup();
            }
        }

        let ctx = ReactiveContext::enter(self.id(), id);
        let outcome = body();
        let tracked = ctx.finish();

        let write_ids = tracked.written;
        let outcome = {
            let mut graph = self.graph();
            if graph.computation(id).is_none() {
                return Err(ReactiveError::DisposedAccess { node: id });
            }
            graph.replace_dependencies(id, tracked.reads);

            let outcome = outcome.and_then(|()| match graph.find_cycle(id, &write_ids) {
                Some(signal) => Err(ReactiveError::CircularDependency {
                    computation: id,
                    signal,
                }),
                None => Ok(()),
            });
            if outcome.is_ok() {
                graph.record_writes(id, write_ids);
            }
            graph.begin_batch();
            outcome
        };

        let outcome = {
            let _batch = BatchGuard { runtime: self };
            match outcome {
                Ok(()) => tracked
                    .writes
                    .into_iter()
                    .map(|write| write())
                    .fold(Ok(()), |acc: Result<()>, next| acc.and(next)),
                Err(err) => Err(err),
            }
        };

        self.graph().finish_run(id, outcome.as_ref().err().cloned());

        match &outcome {
            Ok(()) => trace!(computation = %id, "computation ran"),
            Err(err) if self.config().log_computation_errors => {
                warn!(computation = %id, error = %err, "computation failed");
            }
            Err(_) => {}
        }
        outcome
    }

    fn flush_rounds(&self) -> Result<()> {
        let limit = self.config().max_update_depth;
        let mut round = 0;

        loop {
            let plan = {
                let mut graph = self.graph();
                if !graph.has_pending() {
                    break;
                }
                round += 1;
                if round > limit {
                    graph.abandon_pending();
                    warn!(limit, "maximum update depth exceeded");
                    return Err(ReactiveError::MaxUpdateDepthExceeded { limit });
                }
                graph.plan_round()
            };
            trace!(round, computations = plan.len(), "flush round");

            for (position, id) in plan.into_iter().enumerate() {
                let should_run = self.graph().claim(position, id);
                if should_run {
                    // Failures stay on the computation; siblings keep running.
                    let _ = self.run_computation(id);
                }
            }
        }

        Ok(())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let graph = self.graph();
        f.debug_struct("Runtime")
            .field("id", &self.inner.id)
            .field("signals", &graph.signal_count())
            .field("computations", &graph.computation_count())
            .field("flushing", &graph.is_flushing())
            .finish()
    }
}

/// Closes a batch opened on the graph, even on unwind.
struct BatchGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.runtime.graph().end_batch();
    }
}

/// Ends a flush, even when a computation body panics.
struct FlushGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.runtime.graph().end_flush();
    }
}
