use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::future::{BoxFuture, FutureExt};
use tokio::task::JoinHandle;

/// Future driving an async selector.
///
/// The task completes when its source settles or ends, or as soon as the
/// selector's owner is disposed.
#[must_use = "selector tasks do nothing unless polled or spawned"]
pub struct SelectorTask {
    selector: String,
    future: BoxFuture<'static, ()>,
}

impl SelectorTask {
    pub(crate) fn new<F>(selector: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            selector: selector.into(),
            future: future.boxed(),
        }
    }

    /// Label of the selector this task feeds.
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Hand the task to the tokio runtime.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self)
    }
}

impl Future for SelectorTask {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.get_mut().future.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for SelectorTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorTask")
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}
