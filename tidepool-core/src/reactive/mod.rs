//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computations
//! and the scopes that own them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a running computation, the signal registers that computation as a
//! dependent. When the signal's value changes, all dependents are scheduled.
//!
//! ## Computations
//!
//! A Computation is a tracked body that re-runs whenever a signal it read
//! during its previous run changes. Derived values are computations that
//! write their result into a signal; side effects are computations that
//! write somewhere else.
//!
//! ## Scopes
//!
//! A Scope owns the signals, computations and cleanup callbacks created
//! through it. Disposing a scope tears down everything it owns.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to detect
//! dependencies automatically. When a signal is read, we check if there is
//! an active tracking context and, if so, register the dependency.

mod computation;
mod context;
mod runtime;
mod scope;
mod signal;

pub use computation::{Computation, ComputationState};
pub use context::ReactiveContext;
pub(crate) use context::PendingWrite;
pub use runtime::Runtime;
pub use scope::Scope;
pub use signal::Signal;
