//! Deferred Values
//!
//! A [`Deferred`] is a one-shot value settled from the outside, like a
//! promise whose resolve and reject functions are handed around. Every clone
//! shares the same slot, only the first settlement counts, and every clone
//! can be awaited.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

struct Slot<T> {
    outcome: Option<Result<T, String>>,
    wakers: Vec<Waker>,
}

/// One-shot value settled by [`resolve`](Deferred::resolve) or
/// [`reject`](Deferred::reject).
pub struct Deferred<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Deferred<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                outcome: None,
                wakers: Vec::new(),
            })),
        }
    }

    /// Settle with a value. Returns `false` if already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with an error. Returns `false` if already settled.
    pub fn reject(&self, reason: impl Into<String>) -> bool {
        self.settle(Err(reason.into()))
    }

    pub fn is_settled(&self) -> bool {
        self.slot.lock().outcome.is_some()
    }

    fn settle(&self, outcome: Result<T, String>) -> bool {
        let wakers = {
            let mut slot = self.slot.lock();
            if slot.outcome.is_some() {
                return false;
            }
            slot.outcome = Some(outcome);
            std::mem::take(&mut slot.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Clone> Future for Deferred<T> {
    type Output = Result<T, String>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.lock();
        match &slot.outcome {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => {
                if !slot.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    slot.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("settled", &self.is_settled())
            .finish()
    }
}
