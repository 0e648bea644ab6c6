//! Computation Implementation
//!
//! A Computation is a tracked execution unit. It runs its body immediately
//! on creation and again whenever a signal it read during its previous run
//! changes.
//!
//! # How Computations Work
//!
//! 1. The body runs under a tracking context that records every signal read
//!    synchronously during the run.
//!
//! 2. The recorded set replaces the previous dependency set wholesale, so a
//!    branch not taken on the last run is not a dependency.
//!
//! 3. Before a re-run, everything the previous run created is torn down:
//!    child computations are disposed and cleanup callbacks run.
//!
//! 4. Writes made by the body are committed after it returns. A body that
//!    fails, or that reads a signal it writes, commits nothing.
//!
//! # Pure and Effectful Bodies
//!
//! The engine does not distinguish a body that feeds a derived signal from
//! one that performs an external side effect; only what the body does with
//! its result differs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::runtime::Runtime;
use super::scope::Scope;
use crate::error::{ReactiveError, Result};
use crate::graph::{DirtyState, NodeId};

/// Lifecycle state of a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputationState {
    /// Up-to-date with its dependencies.
    Active,
    /// Downstream of a change, pending confirmation.
    MaybeDirty,
    /// Scheduled to re-run.
    Dirty,
    /// Torn down; will never run again.
    Disposed,
}

impl From<DirtyState> for ComputationState {
    fn from(state: DirtyState) -> Self {
        match state {
            DirtyState::Clean => Self::Active,
            DirtyState::MaybeDirty => Self::MaybeDirty,
            DirtyState::Dirty => Self::Dirty,
        }
    }
}

/// Handle to a computation registered with a runtime.
///
/// Dropping the handle does not dispose the computation; its owner does.
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use tidepool_core::reactive::Runtime;
///
/// let runtime = Runtime::new();
/// let scope = runtime.scope();
/// let count = scope.signal(1).unwrap();
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// let (c, l) = (count.clone(), log.clone());
/// scope
///     .computation(move || {
///         l.lock().unwrap().push(c.get()?);
///         Ok(())
///     })
///     .unwrap();
///
/// count.set(2).unwrap();
/// assert_eq!(*log.lock().unwrap(), vec![1, 2]);
/// ```
#[derive(Clone)]
pub struct Computation {
    id: NodeId,
    runtime: Runtime,
    run_count: Arc<AtomicUsize>,
}

impl Computation {
    pub(crate) fn new_in<F>(scope: &Scope, body: F) -> Result<Self>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let run_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&run_count);
        let body = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            body()
        });

        let runtime = scope.runtime().clone();
        let id = runtime.create_computation(scope.id(), body)?;
        Ok(Self {
            id,
            runtime,
            run_count,
        })
    }

    /// Get the computation's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn state(&self) -> ComputationState {
        self.runtime
            .graph()
            .computation(self.id)
            .map(|node| node.dirty_state().into())
            .unwrap_or(ComputationState::Disposed)
    }

    /// Number of times the body has started, including the creation run.
    pub fn run_count(&self) -> usize {
        self.run_count.load(Ordering::SeqCst)
    }

    /// Error produced by the most recent run, if it failed.
    pub fn last_error(&self) -> Option<ReactiveError> {
        self.runtime
            .graph()
            .computation(self.id)
            .and_then(|node| node.last_error().cloned())
    }

    /// Get the number of signals read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.runtime
            .graph()
            .computation(self.id)
            .map(|node| node.dependencies().len())
            .unwrap_or(0)
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == ComputationState::Disposed
    }

    /// Dispose the computation, its children and its cleanups.
    ///
    /// After disposal, the computation will not run again.
    pub fn dispose(&self) {
        self.runtime.dispose_owner(self.id);
    }
}

impl std::fmt::Debug for Computation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
