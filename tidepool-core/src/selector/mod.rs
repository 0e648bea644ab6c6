//! Selectors
//!
//! A selector feeds a destination signal from a source. Three kinds of
//! source are supported, and all of them surface as ordinary signal writes
//! that go through the same batch and flush pipeline as synchronous writes:
//!
//! - a function, wrapped in a computation that writes its result on every
//!   re-run;
//! - a one-shot future, whose resolved value is written exactly once;
//! - a push-stream, every emission of which is written.
//!
//! Async sources are driven by a [`SelectorTask`] that the host polls or
//! spawns. The engine itself never awaits anything.
//!
//! Every selector also owns a status signal tracking whether its value has
//! arrived ([`SelectorStatus`]).

mod binding;
mod deferred;
mod source;
mod task;

pub(crate) use binding::{bind, Binding};
pub use deferred::Deferred;
pub use source::{FunctionSource, Source};
pub use task::SelectorTask;

use crate::error::{ReactiveError, Result, SelectorRejection};

/// Progress of a selector's source.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SelectorStatus {
    /// No value has arrived yet.
    #[default]
    Pending,
    /// The destination holds a value from the source.
    Ready,
    /// The source failed. The destination keeps its previous value.
    Rejected(SelectorRejection),
}

impl SelectorStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn rejection(&self) -> Option<&SelectorRejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    /// `Err(SelectorRejection)` for a rejected selector, `Ok` otherwise.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Rejected(rejection) => Err(ReactiveError::SelectorRejection(rejection)),
            _ => Ok(()),
        }
    }
}
