//! Selector Binding
//!
//! Connects a [`Source`] to its destination and status signals.
//!
//! # Lifetime
//!
//! Async bindings register a cleanup on the owner that was current when
//! they were bound: the running computation, or the binding's scope. The
//! cleanup clears a liveness flag and aborts the task, so:
//!
//! - a stream stops being polled and is dropped,
//! - a future that settles after disposal is ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::{AbortHandle, Abortable, BoxFuture, FutureExt};
use futures_util::stream::{BoxStream, StreamExt};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::{FunctionSource, SelectorStatus, SelectorTask, Source};
use crate::error::{Result, SelectorRejection};
use crate::reactive::{Scope, Signal};

/// Signals a selector writes into.
#[derive(Clone)]
pub(crate) struct Binding {
    pub selector: String,
    pub scope: Scope,
    pub destination: Signal<Value>,
    pub status: Signal<SelectorStatus>,
}

impl Binding {
    /// Write a value from the source and mark the selector ready, in one
    /// batch.
    fn deliver(&self, value: Value) -> Result<()> {
        self.scope.runtime().batch(|| {
            self.destination.set(value)?;
            self.status.set(SelectorStatus::Ready)
        })?
    }

    fn reject(&self, reason: String) -> Result<()> {
        self.status.set(SelectorStatus::Rejected(SelectorRejection {
            selector: self.selector.clone(),
            reason,
        }))
    }
}

/// Bind `source` to `binding`.
///
/// Function sources run at once and return no task. Async sources return
/// the task that drives them.
pub(crate) fn bind(binding: Binding, source: Source) -> Result<Option<SelectorTask>> {
    trace!(selector = %binding.selector, kind = source.kind(), "binding selector");
    match source {
        Source::Function(f) => bind_function(binding, f).map(|()| None),
        Source::Future(future) => bind_future(binding, future).map(Some),
        Source::Stream(stream) => bind_stream(binding, stream).map(Some),
    }
}

fn bind_function(binding: Binding, f: FunctionSource) -> Result<()> {
    let scope = binding.scope.clone();
    scope.computation(move || {
        let value = f()?;
        binding.destination.set(value)?;
        binding.status.set(SelectorStatus::Ready)
    })?;
    Ok(())
}

/// Register the teardown of an async binding and return its liveness flag
/// and abort registration.
fn guard(binding: &Binding) -> Result<(Arc<AtomicBool>, futures_util::future::AbortRegistration)> {
    let alive = Arc::new(AtomicBool::new(true));
    let (handle, registration) = AbortHandle::new_pair();

    let flag = Arc::clone(&alive);
    let selector = binding.selector.clone();
    binding.scope.on_cleanup(move || {
        flag.store(false, Ordering::SeqCst);
        handle.abort();
        debug!(selector = %selector, "selector torn down");
    })?;

    Ok((alive, registration))
}

fn bind_future(
    binding: Binding,
    future: BoxFuture<'static, std::result::Result<Value, String>>,
) -> Result<SelectorTask> {
    let (alive, registration) = guard(&binding)?;
    let label = binding.selector.clone();

    let task = async move {
        let outcome = future.await;
        if !alive.load(Ordering::SeqCst) {
            debug!(selector = %binding.selector, "future settled after disposal; ignored");
            return;
        }

        let written = match outcome {
            Ok(value) => {
                debug!(selector = %binding.selector, "future resolved");
                binding.deliver(value)
            }
            Err(reason) => {
                debug!(selector = %binding.selector, reason = %reason, "future rejected");
                binding.reject(reason)
            }
        };
        if let Err(err) = written {
            warn!(selector = %binding.selector, error = %err, "failed to apply future outcome");
        }
    };

    Ok(SelectorTask::new(label, Abortable::new(task, registration).map(|_| ())))
}

fn bind_stream(binding: Binding, mut stream: BoxStream<'static, Value>) -> Result<SelectorTask> {
    let (alive, registration) = guard(&binding)?;
    let label = binding.selector.clone();

    let task = async move {
        while let Some(value) = stream.next().await {
            if !alive.load(Ordering::SeqCst) {
                break;
            }
            trace!(selector = %binding.selector, "stream emitted");
            if let Err(err) = binding.deliver(value) {
                warn!(selector = %binding.selector, error = %err, "stopping stream selector");
                break;
            }
        }
        debug!(selector = %binding.selector, "stream selector finished");
    };

    Ok(SelectorTask::new(label, Abortable::new(task, registration).map(|_| ())))
}
