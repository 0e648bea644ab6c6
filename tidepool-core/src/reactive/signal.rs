//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a running computation, the signal
//!    registers that computation as a subscriber.
//!
//! 2. When a signal is written with a value different from its current one,
//!    its version is bumped and every subscriber is marked dirty.
//!
//! 3. Dirty computations re-run in the next flush, never synchronously
//!    inside `set`.
//!
//! Writes issued from inside a computation body are buffered and committed
//! once the body has returned, so a body that fails (or reads what it
//! writes) never publishes a partial update.
//!
//! # Memory Layout
//!
//! Each signal handle consists of:
//! - A node ID (8 bytes) whose graph record holds version and edges
//! - The value, shared behind `Arc<RwLock<T>>`
//! - A runtime handle

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::{PendingWrite, ReactiveContext};
use super::runtime::Runtime;
use crate::error::{ReactiveError, Result};
use crate::graph::NodeId;

/// A reactive signal holding a value of type T.
///
/// # Type Parameters
///
/// - `T`: The stored value. `PartialEq` decides whether a write is a change.
///
/// # Example
///
/// ```rust
/// use tidepool_core::reactive::Runtime;
///
/// let runtime = Runtime::new();
/// let scope = runtime.scope();
/// let count = scope.signal(0).unwrap();
///
/// count.set(5).unwrap();
/// assert_eq!(count.get().unwrap(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    id: NodeId,
    runtime: Runtime,
    value: Arc<RwLock<T>>,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a signal owned by `owner`.
    pub(crate) fn new_in(runtime: &Runtime, owner: NodeId, value: T) -> Result<Self> {
        let id = runtime.graph().add_signal(owner)?;
        Ok(Self {
            id,
            runtime: runtime.clone(),
            value: Arc::new(RwLock::new(value)),
        })
    }

    /// Get the signal's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the current value.
    ///
    /// If called within a running computation, this also registers the
    /// computation as a subscriber.
    pub fn get(&self) -> Result<T> {
        self.runtime.track_read(self.id)?;
        Ok(self.value.read().clone())
    }

    /// Borrow the current value without cloning it. Tracked like [`get`].
    ///
    /// [`get`]: Signal::get
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.runtime.track_read(self.id)?;
        Ok(f(&self.value.read()))
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> Result<T> {
        self.runtime.ensure_signal(self.id)?;
        Ok(self.value.read().clone())
    }

    /// Set a new value.
    ///
    /// Writing a value equal to the current one is a no-op. Outside a batch
    /// and outside any computation the resulting flush runs before this
    /// returns.
    pub fn set(&self, value: T) -> Result<()> {
        self.runtime.ensure_signal(self.id)?;

        let this = self.clone();
        let write: PendingWrite = Box::new(move || this.commit(value));
        match ReactiveContext::defer_write(self.runtime.id(), &[self.id], write) {
            Ok(()) => Ok(()),
            Err(write) => write(),
        }
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&*self.value.read());
        self.set(next)
    }

    /// Apply a write now, bypassing the tracking context.
    fn commit(&self, value: T) -> Result<()> {
        self.runtime.ensure_signal(self.id)?;
        {
            let mut guard = self.value.write();
            if *guard == value {
                return Ok(());
            }
            *guard = value;
        }
        self.runtime.signal_changed(self.id)
    }

    /// Current version. Starts at 0 and grows by one per committed change.
    pub fn version(&self) -> Result<u64> {
        self.runtime
            .graph()
            .signal(self.id)
            .map(|node| node.version())
            .ok_or(ReactiveError::DisposedAccess { node: self.id })
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.runtime
            .graph()
            .signal(self.id)
            .map(|node| node.subscribers().len())
            .unwrap_or(0)
    }

    pub fn is_disposed(&self) -> bool {
        !self.runtime.graph().contains_signal(self.id)
    }

    /// Detach every subscriber edge. Later reads and writes fail with
    /// [`ReactiveError::DisposedAccess`].
    pub fn dispose(&self) {
        self.runtime.dispose_signal(self.id);
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            runtime: self.runtime.clone(),
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &*self.value.read())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn signal_get_and_set() {
        let runtime = Runtime::new();
        let signal = runtime.scope().signal(0).unwrap();
        assert_eq!(signal.get().unwrap(), 0);

        signal.set(42).unwrap();
        assert_eq!(signal.get().unwrap(), 42);
    }

    #[test]
    fn signal_with_borrows() {
        let runtime = Runtime::new();
        let signal = runtime.scope().signal(vec![1, 2, 3]).unwrap();
        assert_eq!(signal.with(|v| v.len()).unwrap(), 3);
    }

    #[test]
    fn signal_update() {
        let runtime = Runtime::new();
        let signal = runtime.scope().signal(10).unwrap();
        signal.update(|v| v + 5).unwrap();
        assert_eq!(signal.get().unwrap(), 15);
    }

    #[test]
    fn equal_write_is_noop() {
        let runtime = Runtime::new();
        let signal = runtime.scope().signal(String::from("a")).unwrap();

        signal.set("a".into()).unwrap();
        assert_eq!(signal.version().unwrap(), 0);

        signal.set("b".into()).unwrap();
        assert_eq!(signal.version().unwrap(), 1);
    }

    #[test]
    fn signal_notifies_subscribers() {
        let runtime = Runtime::new();
        let scope = runtime.scope();
        let signal = scope.signal(0).unwrap();
        let seen = Arc::new(AtomicI32::new(-1));

        let s = signal.clone();
        let seen_clone = seen.clone();
        scope
            .computation(move || {
                seen_clone.store(s.get()?, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert_eq!(signal.subscriber_count(), 1);
        signal.set(7).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn signal_clone_shares_state() {
        let runtime = Runtime::new();
        let signal1 = runtime.scope().signal(0).unwrap();
        let signal2 = signal1.clone();

        signal1.set(42).unwrap();
        assert_eq!(signal2.get().unwrap(), 42);

        signal2.set(100).unwrap();
        assert_eq!(signal1.get().unwrap(), 100);
    }

    #[test]
    fn disposed_signal_fails_loudly() {
        let runtime = Runtime::new();
        let signal = runtime.scope().signal(1).unwrap();
        signal.dispose();

        let expected = ReactiveError::DisposedAccess { node: signal.id() };
        assert!(signal.is_disposed());
        assert_eq!(signal.get(), Err(expected.clone()));
        assert_eq!(signal.set(2), Err(expected));
    }

    #[test]
    fn signal_ids_are_unique() {
        let runtime = Runtime::new();
        let scope = runtime.scope();
        let s1 = scope.signal(0).unwrap();
        let s2 = scope.signal(0).unwrap();

        assert_ne!(s1.id(), s2.id());
    }
}
