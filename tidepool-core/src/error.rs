//! Error Taxonomy
//!
//! Every fallible operation in the engine returns [`ReactiveError`]. Errors
//! are `Clone` because the engine stores them: a failing computation keeps
//! its last error, and a rejected future selector keeps its rejection on the
//! selector's status signal.

use std::fmt;

use thiserror::Error;

use crate::graph::NodeId;

/// A future-backed selector settled with an error.
///
/// Rejections are stored, never thrown through a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorRejection {
    /// Label of the selector, usually the destination key path.
    pub selector: String,
    /// Display form of the error the future produced.
    pub reason: String,
}

impl fmt::Display for SelectorRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "selector `{}` rejected: {}", self.selector, self.reason)
    }
}

/// Errors raised by the reactive engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReactiveError {
    /// A computation reads a signal that it also writes, either directly or
    /// through the write-sets of the computations downstream of it.
    #[error("computation {computation} depends on signal {signal}, which it also writes")]
    CircularDependency {
        computation: NodeId,
        signal: NodeId,
    },

    /// A flush kept producing new writes for more rounds than allowed.
    #[error("maximum update depth of {limit} exceeded while flushing")]
    MaxUpdateDepthExceeded { limit: usize },

    /// A future-backed selector rejected.
    #[error("{0}")]
    SelectorRejection(SelectorRejection),

    /// A signal, computation or scope was used after it was disposed.
    #[error("node {node} has been disposed")]
    DisposedAccess { node: NodeId },

    /// A patch could not be applied to the container.
    #[error("invalid patch at `{path}`: {reason}")]
    InvalidPatch { path: String, reason: String },

    /// A patch tried to overwrite a key that is fed by a selector.
    #[error("`{path}` is bound to a selector and cannot be set directly")]
    ReadOnlyPath { path: String },

    /// Conversion to or from the container's JSON representation failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failure raised by user code inside a computation body.
    #[error("computation failed: {0}")]
    Computation(String),
}

impl ReactiveError {
    /// Shorthand for a free-form body failure.
    pub fn computation(message: impl fmt::Display) -> Self {
        Self::Computation(message.to_string())
    }
}

impl From<serde_json::Error> for ReactiveError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<SelectorRejection> for ReactiveError {
    fn from(rejection: SelectorRejection) -> Self {
        Self::SelectorRejection(rejection)
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_displays_selector_and_reason() {
        let err = ReactiveError::from(SelectorRejection {
            selector: "profile".into(),
            reason: "timeout".into(),
        });
        assert_eq!(err.to_string(), "selector `profile` rejected: timeout");
    }

    #[test]
    fn serde_errors_convert() {
        let err: ReactiveError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ReactiveError::Serialization(_)));
    }
}
