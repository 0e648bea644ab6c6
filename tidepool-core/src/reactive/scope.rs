//! Scopes
//!
//! A scope is an explicit ownership root. Signals, computations, nested
//! scopes and cleanup callbacks created through it belong to it, and
//! disposing the scope tears all of them down.
//!
//! Ownership follows execution: a computation (or nested scope, or cleanup)
//! created while another computation of the same runtime is running belongs
//! to the running computation instead, so it is torn down when that
//! computation re-runs. Signals always belong to the scope they were created
//! through.

use super::computation::Computation;
use super::runtime::Runtime;
use super::signal::Signal;
use crate::error::{ReactiveError, Result};
use crate::graph::NodeId;

/// Handle to an ownership scope.
#[derive(Clone)]
pub struct Scope {
    id: NodeId,
    runtime: Runtime,
}

impl Scope {
    pub(crate) fn from_parts(id: NodeId, runtime: Runtime) -> Self {
        Self { id, runtime }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Create a nested scope.
    pub fn child(&self) -> Result<Scope> {
        let owner = self.runtime.current_owner(self.id);
        let id = self.runtime.graph().add_scope(owner)?;
        Ok(Self::from_parts(id, self.runtime.clone()))
    }

    /// Create a signal owned by this scope.
    pub fn signal<T>(&self, value: T) -> Result<Signal<T>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        Signal::new_in(&self.runtime, self.id, value)
    }

    /// Create a computation and run it immediately.
    ///
    /// The body re-runs whenever a signal it read during its previous run
    /// changes.
    pub fn computation<F>(&self, body: F) -> Result<Computation>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        Computation::new_in(self, body)
    }

    /// Register a callback to run on teardown of the current owner: the
    /// running computation if there is one, otherwise this scope.
    pub fn on_cleanup<F>(&self, cleanup: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let owner = self.runtime.current_owner(self.id);
        self.runtime.add_cleanup(owner, Box::new(cleanup))
    }

    pub fn is_disposed(&self) -> bool {
        !self.runtime.graph().contains_owner(self.id)
    }

    /// Fail with [`ReactiveError::DisposedAccess`] once disposed.
    pub fn ensure_alive(&self) -> Result<()> {
        if self.is_disposed() {
            Err(ReactiveError::DisposedAccess { node: self.id })
        } else {
            Ok(())
        }
    }

    /// Dispose the scope and everything it owns.
    pub fn dispose(&self) {
        tracing::debug!(scope = %self.id, "disposing scope");
        self.runtime.dispose_owner(self.id);
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispose_runs_cleanups_and_drops_nodes() {
        let runtime = Runtime::new();
        let scope = runtime.scope();
        let cleaned = Arc::new(AtomicUsize::new(0));

        let c = cleaned.clone();
        scope
            .on_cleanup(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let signal = scope.signal(0).unwrap();

        scope.dispose();
        assert!(scope.is_disposed());
        assert!(signal.is_disposed());
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn child_scope_disposed_with_parent() {
        let runtime = Runtime::new();
        let parent = runtime.scope();
        let child = parent.child().unwrap();
        let signal = child.signal(1).unwrap();

        parent.dispose();
        assert!(child.is_disposed());
        assert!(signal.is_disposed());
    }

    #[test]
    fn disposed_scope_rejects_new_nodes() {
        let runtime = Runtime::new();
        let scope = runtime.scope();
        scope.dispose();

        assert_eq!(
            scope.signal(0).map(|_| ()),
            Err(ReactiveError::DisposedAccess { node: scope.id() })
        );
        assert!(scope.computation(|| Ok(())).is_err());
        assert!(scope.ensure_alive().is_err());
    }

    #[test]
    fn disposing_child_keeps_parent() {
        let runtime = Runtime::new();
        let parent = runtime.scope();
        let child = parent.child().unwrap();

        child.dispose();
        assert!(child.is_disposed());
        assert!(!parent.is_disposed());
        assert!(parent.signal(0).is_ok());
    }
}
