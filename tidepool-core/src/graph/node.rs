//! Graph Nodes
//!
//! This module defines the node records that live in the dependency graph.
//! Three kinds of node share one id space:
//!
//! - signal nodes hold the subscriber and writer edges of a signal,
//! - computation nodes hold the body, read-set and write-set of a computation,
//! - owner records hold what a scope or computation owns.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;

use crate::error::{ReactiveError, Result};

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Dirty state of a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// Up-to-date with every signal it read.
    Clean,

    /// Downstream of a changed signal, but none of its own inputs has been
    /// rewritten yet. Skipped unless promoted to `Dirty` before its turn.
    MaybeDirty,

    /// At least one signal it read has changed.
    Dirty,
}

/// Body of a computation.
pub(crate) type Body = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Callback run when an owner re-runs or is disposed.
pub(crate) type Cleanup = Box<dyn FnOnce() + Send>;

/// Graph record of a signal.
#[derive(Debug, Default)]
pub struct SignalNode {
    /// Bumped on every committed change.
    version: u64,

    /// Computations that read this signal during their most recent run.
    subscribers: IndexSet<NodeId>,

    /// Computations that have written this signal in any successful run.
    writers: IndexSet<NodeId>,
}

impl SignalNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn bump(&mut self) {
        self.version += 1;
    }

    pub fn subscribers(&self) -> &IndexSet<NodeId> {
        &self.subscribers
    }

    pub(crate) fn subscribers_mut(&mut self) -> &mut IndexSet<NodeId> {
        &mut self.subscribers
    }

    pub fn writers(&self) -> &IndexSet<NodeId> {
        &self.writers
    }

    pub(crate) fn writers_mut(&mut self) -> &mut IndexSet<NodeId> {
        &mut self.writers
    }
}

/// Graph record of a computation.
pub struct ComputationNode {
    body: Body,
    dirty: DirtyState,

    /// Signals read during the most recent run. Replaced wholesale each run.
    dependencies: IndexSet<NodeId>,

    /// Signals written by the most recent successful run.
    writes: IndexSet<NodeId>,

    /// Every signal any successful run has written. Only grows, so a
    /// conditional write still orders this computation ahead of readers.
    supplies: IndexSet<NodeId>,

    last_error: Option<ReactiveError>,
}

impl ComputationNode {
    pub(crate) fn new(body: Body) -> Self {
        Self {
            body,
            // Starts dirty so the creation run is a regular run.
            dirty: DirtyState::Dirty,
            dependencies: IndexSet::new(),
            writes: IndexSet::new(),
            supplies: IndexSet::new(),
            last_error: None,
        }
    }

    pub(crate) fn body(&self) -> Body {
        Arc::clone(&self.body)
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    pub(crate) fn mark_maybe_dirty(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::MaybeDirty;
        }
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = DirtyState::Dirty;
    }

    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    pub(crate) fn replace_dependencies(&mut self, deps: IndexSet<NodeId>) -> IndexSet<NodeId> {
        std::mem::replace(&mut self.dependencies, deps)
    }

    pub fn writes(&self) -> &IndexSet<NodeId> {
        &self.writes
    }

    /// Record the write-set of a successful run.
    pub(crate) fn record_writes(&mut self, writes: IndexSet<NodeId>) {
        self.supplies.extend(writes.iter().copied());
        self.writes = writes;
    }

    pub fn supplies(&self) -> &IndexSet<NodeId> {
        &self.supplies
    }

    /// Drop a removed signal from both write-sets.
    pub(crate) fn forget_signal(&mut self, signal: NodeId) {
        self.writes.shift_remove(&signal);
        self.supplies.shift_remove(&signal);
    }

    pub fn last_error(&self) -> Option<&ReactiveError> {
        self.last_error.as_ref()
    }

    pub(crate) fn finish_run(&mut self, error: Option<ReactiveError>) {
        self.last_error = error;
        self.dirty = DirtyState::Clean;
    }
}

impl fmt::Debug for ComputationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputationNode")
            .field("dirty", &self.dirty)
            .field("dependencies", &self.dependencies)
            .field("writes", &self.writes)
            .field("supplies", &self.supplies)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// What a scope or computation owns.
#[derive(Default)]
pub struct OwnerNode {
    parent: Option<NodeId>,

    /// Owned computations and nested scopes, in creation order.
    children: Vec<NodeId>,

    /// Signals created under this owner.
    signals: Vec<NodeId>,

    cleanups: Vec<Cleanup>,
}

impl OwnerNode {
    pub(crate) fn new(parent: Option<NodeId>) -> Self {
        Self {
            parent,
            ..Self::default()
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub(crate) fn adopt(&mut self, child: NodeId) {
        self.children.push(child);
    }

    pub(crate) fn release(&mut self, child: NodeId) {
        self.children.retain(|c| *c != child);
    }

    pub(crate) fn own_signal(&mut self, signal: NodeId) {
        self.signals.push(signal);
    }

    pub(crate) fn on_cleanup(&mut self, cleanup: Cleanup) {
        self.cleanups.push(cleanup);
    }

    /// Detach everything owned so far, leaving the owner itself in place.
    pub(crate) fn take_owned(&mut self) -> Owned {
        Owned {
            children: std::mem::take(&mut self.children),
            signals: std::mem::take(&mut self.signals),
            cleanups: std::mem::take(&mut self.cleanups),
        }
    }
}

impl fmt::Debug for OwnerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerNode")
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("signals", &self.signals)
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}

/// Everything an owner held at teardown time.
pub(crate) struct Owned {
    pub children: Vec<NodeId>,
    pub signals: Vec<NodeId>,
    pub cleanups: Vec<Cleanup>,
}

impl Owned {
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.signals.is_empty() && self.cleanups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_body() -> Body {
        Arc::new(|| Ok(()))
    }

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn computation_starts_dirty() {
        let node = ComputationNode::new(noop_body());
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
        assert!(node.dependencies().is_empty());
    }

    #[test]
    fn dirty_state_transitions() {
        let mut node = ComputationNode::new(noop_body());

        node.mark_clean();
        assert!(node.is_clean());

        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::MaybeDirty);

        node.mark_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);

        // MaybeDirty never downgrades Dirty
        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
    }

    #[test]
    fn dependencies_are_replaced_wholesale() {
        let mut node = ComputationNode::new(noop_body());
        let a = NodeId::new();
        let b = NodeId::new();

        node.replace_dependencies([a, b].into_iter().collect());
        let old = node.replace_dependencies([b].into_iter().collect());

        assert_eq!(old.len(), 2);
        assert!(!node.dependencies().contains(&a));
        assert!(node.dependencies().contains(&b));
    }

    #[test]
    fn supplies_outlive_the_latest_writes() {
        let mut node = ComputationNode::new(noop_body());
        let a = NodeId::new();
        let b = NodeId::new();

        node.record_writes([a].into_iter().collect());
        node.record_writes([b].into_iter().collect());
        assert_eq!(node.writes().len(), 1);
        assert!(node.supplies().contains(&a));
        assert!(node.supplies().contains(&b));

        node.forget_signal(a);
        assert!(!node.supplies().contains(&a));
    }

    #[test]
    fn finish_run_records_error() {
        let mut node = ComputationNode::new(noop_body());
        node.finish_run(Some(ReactiveError::computation("boom")));
        assert!(node.last_error().is_some());
        assert!(node.is_clean());
    }

    #[test]
    fn owner_take_owned_empties_record() {
        let mut owner = OwnerNode::new(None);
        owner.adopt(NodeId::new());
        owner.own_signal(NodeId::new());
        owner.on_cleanup(Box::new(|| {}));

        let owned = owner.take_owned();
        assert!(!owned.is_empty());
        assert!(owner.take_owned().is_empty());
    }
}
