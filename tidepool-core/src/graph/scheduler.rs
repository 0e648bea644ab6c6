//! Update Scheduler
//!
//! The scheduler owns the dependency graph and determines the order in which
//! dirty computations run. It ensures that every computation supplying a
//! signal runs before the computations reading that signal.
//!
//! # Algorithm
//!
//! A flush proceeds in rounds:
//!
//! 1. Take the computations made dirty since the last round (the seeds).
//! 2. Walk forward from the seeds: every signal a computation has ever
//!    written leads to its subscribers, which are reached next. Everything
//!    reached that is not a seed is marked "maybe dirty".
//! 3. Sort the reached set topologically (suppliers before readers).
//!    Computations with no supply edge between them run those reading fewer
//!    signals first, so a conditional first write usually lands before a
//!    reader that combines it with other inputs.
//! 4. Run the plan in order. A "maybe dirty" computation is promoted to
//!    "dirty" when a signal it reads is committed with a new value; one that
//!    is still "maybe dirty" when its turn comes is skipped.
//! 5. Writes that reach a computation already run this round (or not in the
//!    plan at all) become seeds of the next round.
//!
//! This "push-pull" approach runs each affected computation once per round
//! and never lets a reader observe a half-updated set of inputs.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use indexmap::IndexSet;

use super::node::{Body, Cleanup, ComputationNode, DirtyState, NodeId, OwnerNode, SignalNode};
use crate::error::{ReactiveError, Result};

/// Position bookkeeping for the round currently executing.
#[derive(Debug)]
struct RoundCursor {
    positions: HashMap<NodeId, usize>,
    /// Index of the next computation to run.
    next: usize,
}

/// The update scheduler manages the dependency graph and coordinates updates.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    signals: HashMap<NodeId, SignalNode>,
    computations: HashMap<NodeId, ComputationNode>,
    owners: HashMap<NodeId, OwnerNode>,

    /// Computations waiting for the next round.
    pending: IndexSet<NodeId>,

    batch_depth: usize,
    flushing: bool,
    cursor: Option<RoundCursor>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Add a top-level scope. Scopes own nodes but never run.
    pub fn add_root_scope(&mut self) -> NodeId {
        let id = NodeId::new();
        self.owners.insert(id, OwnerNode::new(None));
        id
    }

    /// Add a scope owned by `parent`.
    pub fn add_scope(&mut self, parent: NodeId) -> Result<NodeId> {
        let id = NodeId::new();
        self.owner_mut(parent)?.adopt(id);
        self.owners.insert(id, OwnerNode::new(Some(parent)));
        Ok(id)
    }

    /// Add a signal owned by `owner`.
    pub fn add_signal(&mut self, owner: NodeId) -> Result<NodeId> {
        let id = NodeId::new();
        self.owner_mut(owner)?.own_signal(id);
        self.signals.insert(id, SignalNode::new());
        Ok(id)
    }

    /// Add a computation owned by `owner`. It starts dirty and has not run.
    pub(crate) fn add_computation(&mut self, owner: NodeId, body: Body) -> Result<NodeId> {
        let id = NodeId::new();
        self.owner_mut(owner)?.adopt(id);
        self.owners.insert(id, OwnerNode::new(Some(owner)));
        self.computations.insert(id, ComputationNode::new(body));
        Ok(id)
    }

    fn owner_mut(&mut self, id: NodeId) -> Result<&mut OwnerNode> {
        self.owners
            .get_mut(&id)
            .ok_or(ReactiveError::DisposedAccess { node: id })
    }

    pub fn signal(&self, id: NodeId) -> Option<&SignalNode> {
        self.signals.get(&id)
    }

    pub fn computation(&self, id: NodeId) -> Option<&ComputationNode> {
        self.computations.get(&id)
    }

    pub fn owner(&self, id: NodeId) -> Option<&OwnerNode> {
        self.owners.get(&id)
    }

    pub fn contains_signal(&self, id: NodeId) -> bool {
        self.signals.contains_key(&id)
    }

    pub fn contains_owner(&self, id: NodeId) -> bool {
        self.owners.contains_key(&id)
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    pub fn computation_count(&self) -> usize {
        self.computations.len()
    }

    /// Record the outcome of a run and mark the computation clean.
    pub fn finish_run(&mut self, id: NodeId, error: Option<ReactiveError>) {
        if let Some(node) = self.computations.get_mut(&id) {
            node.finish_run(error);
        }
    }

    /// Register a cleanup on a scope or computation.
    pub(crate) fn add_cleanup(&mut self, owner: NodeId, cleanup: Cleanup) -> Result<()> {
        self.owner_mut(owner)?.on_cleanup(cleanup);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    /// Replace the read-set of a computation, rewiring subscriber edges.
    pub fn replace_dependencies(&mut self, id: NodeId, reads: IndexSet<NodeId>) {
        let reads: IndexSet<NodeId> = reads
            .into_iter()
            .filter(|signal| self.signals.contains_key(signal))
            .collect();

        let Some(node) = self.computations.get_mut(&id) else {
            return;
        };
        let old = node.replace_dependencies(reads.clone());

        for signal in old.difference(&reads) {
            if let Some(signal) = self.signals.get_mut(signal) {
                signal.subscribers_mut().shift_remove(&id);
            }
        }
        for signal in &reads {
            if let Some(signal) = self.signals.get_mut(signal) {
                signal.subscribers_mut().insert(id);
            }
        }
    }

    /// Record the write-set of a successful run.
    ///
    /// Writer edges are sticky: a run that skips a write keeps the edge, so
    /// the computation stays ordered ahead of that signal's readers.
    pub fn record_writes(&mut self, id: NodeId, writes: IndexSet<NodeId>) {
        let writes: IndexSet<NodeId> = writes
            .into_iter()
            .filter(|signal| self.signals.contains_key(signal))
            .collect();

        let Some(node) = self.computations.get_mut(&id) else {
            return;
        };
        node.record_writes(writes.clone());

        for signal in &writes {
            if let Some(signal) = self.signals.get_mut(signal) {
                signal.writers_mut().insert(id);
            }
        }
    }

    /// Find a signal in `writes` that `id` depends on, directly or through
    /// the computations downstream of it.
    ///
    /// Must be called after the computation's read-set has been replaced.
    pub fn find_cycle(&self, id: NodeId, writes: &IndexSet<NodeId>) -> Option<NodeId> {
        let node = self.computations.get(&id)?;
        if let Some(signal) = writes.iter().find(|s| node.dependencies().contains(*s)) {
            return Some(*signal);
        }

        for &signal in writes {
            let Some(start) = self.signals.get(&signal) else {
                continue;
            };
            let mut visited = HashSet::new();
            let mut queue: VecDeque<NodeId> = start.subscribers().iter().copied().collect();

            while let Some(reader) = queue.pop_front() {
                if reader == id {
                    return Some(signal);
                }
                if !visited.insert(reader) {
                    continue;
                }
                if let Some(reader) = self.computations.get(&reader) {
                    for written in reader.writes() {
                        if let Some(written) = self.signals.get(written) {
                            queue.extend(written.subscribers().iter().copied());
                        }
                    }
                }
            }
        }

        None
    }

    // ------------------------------------------------------------------
    // Change propagation
    // ------------------------------------------------------------------

    /// Record a committed change to `signal` and mark its readers dirty.
    pub fn signal_changed(&mut self, signal: NodeId) -> Result<()> {
        let node = self
            .signals
            .get_mut(&signal)
            .ok_or(ReactiveError::DisposedAccess { node: signal })?;
        node.bump();
        let readers: Vec<NodeId> = node.subscribers().iter().copied().collect();

        for reader in readers {
            self.schedule(reader);
        }
        Ok(())
    }

    /// Mark a computation dirty, either within the running round or for the
    /// next one.
    fn schedule(&mut self, id: NodeId) {
        let Some(node) = self.computations.get_mut(&id) else {
            return;
        };
        node.mark_dirty();

        let upcoming = self
            .cursor
            .as_ref()
            .and_then(|cursor| cursor.positions.get(&id).map(|pos| *pos >= cursor.next))
            .unwrap_or(false);
        if !upcoming {
            self.pending.insert(id);
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ------------------------------------------------------------------
    // Batches and flushes
    // ------------------------------------------------------------------

    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    pub fn end_batch(&mut self) {
        self.batch_depth = self.batch_depth.saturating_sub(1);
    }

    pub fn batch_depth(&self) -> usize {
        self.batch_depth
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub fn begin_flush(&mut self) {
        self.flushing = true;
    }

    pub fn end_flush(&mut self) {
        self.flushing = false;
        self.cursor = None;
    }

    /// Drop every pending computation, leaving it clean.
    pub fn abandon_pending(&mut self) {
        for id in std::mem::take(&mut self.pending) {
            if let Some(node) = self.computations.get_mut(&id) {
                node.mark_clean();
            }
        }
    }

    /// Turn the pending computations into an ordered plan for one round.
    pub fn plan_round(&mut self) -> Vec<NodeId> {
        let seeds: Vec<NodeId> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|id| self.computations.contains_key(id))
            .collect();

        let plan = self.mark_changed(&seeds);
        self.cursor = Some(RoundCursor {
            positions: plan.iter().enumerate().map(|(pos, id)| (*id, pos)).collect(),
            next: 0,
        });
        plan
    }

    /// Advance the round to `position` and decide whether `id` must run.
    ///
    /// Computations still "maybe dirty" at their turn are marked clean and
    /// skipped.
    pub fn claim(&mut self, position: usize, id: NodeId) -> bool {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.next = position + 1;
        }
        let Some(node) = self.computations.get_mut(&id) else {
            return false;
        };
        match node.dirty_state() {
            DirtyState::Dirty => true,
            DirtyState::MaybeDirty | DirtyState::Clean => {
                node.mark_clean();
                false
            }
        }
    }

    /// Mark seeds dirty and everything downstream maybe-dirty.
    ///
    /// Returns the affected computations in topological order.
    pub fn mark_changed(&mut self, seeds: &[NodeId]) -> Vec<NodeId> {
        let mut to_process = Vec::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeId> = seeds.iter().copied().collect();

        for seed in seeds {
            if let Some(node) = self.computations.get_mut(seed) {
                node.mark_dirty();
            }
        }

        // BFS to propagate maybe-dirty status
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }

            let Some(node) = self.computations.get_mut(&id) else {
                continue;
            };
            node.mark_maybe_dirty();
            to_process.push(id);

            for written in node.supplies().clone() {
                if let Some(signal) = self.signals.get(&written) {
                    queue.extend(signal.subscribers().iter().copied());
                }
            }
        }

        self.topological_sort(to_process)
    }

    /// Perform a topological sort of the given computations.
    ///
    /// `a` precedes `b` when a signal `a` has written is in `b`'s read-set.
    /// Among computations ready at the same time, fewer reads go first, then
    /// discovery order. Anything left over by a cycle keeps its discovery
    /// order at the end.
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut successors: HashMap<NodeId, IndexSet<NodeId>> = HashMap::new();
        let mut in_degree: HashMap<NodeId, usize> = nodes.iter().map(|id| (*id, 0)).collect();

        for &id in &nodes {
            let Some(node) = self.computations.get(&id) else {
                continue;
            };
            let edges = successors.entry(id).or_default();
            for written in node.supplies() {
                let Some(signal) = self.signals.get(written) else {
                    continue;
                };
                for reader in signal.subscribers() {
                    if *reader != id && node_set.contains(reader) && edges.insert(*reader) {
                        *in_degree.entry(*reader).or_default() += 1;
                    }
                }
            }
        }

        let rank: HashMap<NodeId, (usize, usize)> = nodes
            .iter()
            .enumerate()
            .map(|(discovered, id)| {
                let reads = self
                    .computations
                    .get(id)
                    .map_or(0, |node| node.dependencies().len());
                (*id, (reads, discovered))
            })
            .collect();
        let ready = |id: NodeId| {
            let (reads, discovered) = rank.get(&id).copied().unwrap_or_default();
            Reverse((reads, discovered, id))
        };

        // Kahn's algorithm
        let mut queue: BinaryHeap<Reverse<(usize, usize, NodeId)>> = nodes
            .iter()
            .copied()
            .filter(|id| in_degree.get(id) == Some(&0))
            .map(ready)
            .collect();
        let mut result = Vec::with_capacity(nodes.len());
        let mut placed = HashSet::new();

        while let Some(Reverse((_, _, id))) = queue.pop() {
            result.push(id);
            placed.insert(id);

            if let Some(edges) = successors.get(&id) {
                for next in edges {
                    if let Some(degree) = in_degree.get_mut(next) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push(ready(*next));
                        }
                    }
                }
            }
        }

        if result.len() < nodes.len() {
            tracing::warn!(
                unordered = nodes.len() - result.len(),
                "dependency cycle among scheduled computations"
            );
            result.extend(nodes.into_iter().filter(|id| !placed.contains(id)));
        }

        result
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Tear down everything `owner` owns while keeping `owner` itself.
    ///
    /// Used before a computation re-runs. Returns the cleanups to run,
    /// children's first.
    pub(crate) fn reset_owner(&mut self, owner: NodeId) -> Vec<Cleanup> {
        let Some(record) = self.owners.get_mut(&owner) else {
            return Vec::new();
        };
        let owned = record.take_owned();
        if owned.is_empty() {
            return Vec::new();
        }

        let mut cleanups = Vec::new();
        for child in owned.children {
            cleanups.extend(self.remove_owner_tree(child));
        }
        for signal in owned.signals {
            self.remove_signal(signal);
        }
        cleanups.extend(owned.cleanups);
        cleanups
    }

    /// Remove a scope or computation along with everything it owns.
    ///
    /// Returns the cleanups to run, children's first.
    pub(crate) fn dispose_owner(&mut self, id: NodeId) -> Vec<Cleanup> {
        if let Some(parent) = self.owners.get(&id).and_then(|record| record.parent()) {
            if let Some(parent) = self.owners.get_mut(&parent) {
                parent.release(id);
            }
        }
        self.remove_owner_tree(id)
    }

    fn remove_owner_tree(&mut self, id: NodeId) -> Vec<Cleanup> {
        let cleanups = self.reset_owner(id);
        self.owners.remove(&id);

        if let Some(node) = self.computations.remove(&id) {
            for signal in node.dependencies() {
                if let Some(signal) = self.signals.get_mut(signal) {
                    signal.subscribers_mut().shift_remove(&id);
                }
            }
            for signal in node.supplies() {
                if let Some(signal) = self.signals.get_mut(signal) {
                    signal.writers_mut().shift_remove(&id);
                }
            }
            self.pending.shift_remove(&id);
        }

        cleanups
    }

    /// Remove a signal and every edge touching it.
    pub fn remove_signal(&mut self, id: NodeId) {
        let Some(node) = self.signals.remove(&id) else {
            return;
        };
        for reader in node.subscribers() {
            if let Some(reader) = self.computations.get_mut(reader) {
                let mut deps = reader.dependencies().clone();
                deps.shift_remove(&id);
                reader.replace_dependencies(deps);
            }
        }
        for writer in node.writers() {
            if let Some(writer) = self.computations.get_mut(writer) {
                writer.forget_signal(id);
            }
        }
    }
}
