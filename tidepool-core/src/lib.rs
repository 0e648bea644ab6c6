//! Tidepool Core
//!
//! This crate provides a fine-grained reactive state engine. It implements:
//!
//! - Reactive primitives (signals, computations, scopes)
//! - A glitch-free, batched update scheduler
//! - A state container over nested JSON-like data with patch diffing
//! - Selectors binding functions, futures and streams to state fields
//!
//! The engine never renders anything. It only decides when, and in what
//! order, pieces of derived computation must re-execute.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `graph`: Dependency graph storage and flush planning
//! - `state`: Key paths, the diff engine and the state container
//! - `selector`: Async sources and their adapter onto signals
//! - `config`, `error`: Runtime configuration and the error taxonomy
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use tidepool_core::StateContainer;
//!
//! let state = StateContainer::new(json!({ "a": 1, "b": 2 })).unwrap();
//! assert_eq!(state.get("a").unwrap(), json!(1));
//!
//! state.set(json!({ "a": 5 })).unwrap();
//! assert_eq!(state.get("a").unwrap(), json!(5));
//! assert_eq!(state.get("b").unwrap(), json!(2));
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod selector;
pub mod state;

pub use config::RuntimeConfig;
pub use error::{ReactiveError, Result, SelectorRejection};
pub use reactive::{Computation, ComputationState, Runtime, Scope, Signal};
pub use selector::{Deferred, SelectorStatus, SelectorTask, Source};
pub use state::{ChangeSet, KeyPath, StateContainer};
