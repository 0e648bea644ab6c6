//! State Containers
//!
//! Nested data exposed as lazily materialized signals, updated through
//! patches that are diffed so only the leaves that change are written.

mod container;
mod diff;
mod path;

pub use container::StateContainer;
pub use diff::{diff, Change, ChangeSet};
pub use path::KeyPath;
