//! Dependency Graph
//!
//! This module implements the bipartite dependency graph between signals and
//! the computations that read and write them.
//!
//! # Overview
//!
//! - Signal nodes know their subscribers (computations that read them during
//!   their last run) and their writers (computations whose last successful
//!   run wrote them).
//! - Computation nodes know their read-set and write-set.
//! - Owner records form a tree of scopes and computations; disposing an
//!   owner removes its subtree.
//!
//! A computation `a` supplies a computation `b` when `a`'s write-set
//! intersects `b`'s read-set. The scheduler orders every flush round along
//! that relation, which is what keeps propagation glitch-free.
//!
//! # Design Decisions
//!
//! 1. The graph is centralized rather than stored in per-signal lists:
//!    - topological ordering of a whole round needs a global view,
//!    - cycle detection walks across many nodes at once.
//!
//! 2. Nodes are indexed by id for O(1) lookups.
//!
//! 3. Both directions of every edge are stored so traversal is cheap either
//!    way.

mod node;
mod scheduler;

pub use node::{ComputationNode, DirtyState, NodeId, OwnerNode, SignalNode};
pub use scheduler::UpdateScheduler;

pub(crate) use node::{Body, Cleanup};
