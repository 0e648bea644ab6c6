//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! we can register the current computation as a dependent.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! When a computation runs we push a frame; when its body returns we pop the
//! frame and hand its contents (the signals read and the writes issued) back
//! to the runtime.
//!
//! Writes made inside a tracked frame are not applied immediately. They are
//! queued on the frame and committed by the runtime only after the body has
//! finished and passed cycle detection, so a failing run never leaks a
//! partial update.
//!
//! Frames are tagged with the runtime they belong to, so two runtimes used on
//! the same thread never see each other's reads.
//!
//! Untracked frames (see [`ReactiveContext::untracked`]) suspend tracking
//! without leaving the enclosing computation: reads inside them are ignored
//! and writes commit immediately.

use std::cell::RefCell;

use indexmap::IndexSet;

use crate::error::Result;
use crate::graph::NodeId;

/// A write waiting for its computation to finish.
pub(crate) type PendingWrite = Box<dyn FnOnce() -> Result<()>>;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = RefCell::new(Vec::new());
}

/// An entry in the reactive context stack.
struct Frame {
    runtime: NodeId,
    /// `None` for untracked frames.
    computation: Option<NodeId>,
    reads: IndexSet<NodeId>,
    /// Signals the queued writes will touch.
    written: IndexSet<NodeId>,
    writes: Vec<PendingWrite>,
}

/// What a tracked run observed.
pub(crate) struct Tracked {
    pub reads: IndexSet<NodeId>,
    pub written: IndexSet<NodeId>,
    pub writes: Vec<PendingWrite>,
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if a computation body panics.
pub struct ReactiveContext {
    runtime: NodeId,
    computation: Option<NodeId>,
    finished: bool,
}

impl ReactiveContext {
    /// Enter a tracked frame for `computation`.
    pub fn enter(runtime: NodeId, computation: NodeId) -> Self {
        Self::push(runtime, Some(computation))
    }

    /// Enter a frame in which reads are not tracked and writes are not
    /// deferred.
    pub fn untracked(runtime: NodeId) -> Self {
        Self::push(runtime, None)
    }

    fn push(runtime: NodeId, computation: Option<NodeId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                runtime,
                computation,
                reads: IndexSet::new(),
                written: IndexSet::new(),
                writes: Vec::new(),
            });
        });

        Self {
            runtime,
            computation,
            finished: false,
        }
    }

    /// Check if any frame is active on this thread.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The innermost computation of `runtime` that is currently running,
    /// looking through untracked frames.
    pub fn current_computation(runtime: NodeId) -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .filter(|frame| frame.runtime == runtime)
                .find_map(|frame| frame.computation)
        })
    }

    /// Whether reads on `runtime` are currently being recorded.
    pub fn is_tracking(runtime: NodeId) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|frame| frame.runtime == runtime)
                .is_some_and(|frame| frame.computation.is_some())
        })
    }

    /// Record a read of `signal`. Returns whether it was recorded.
    pub fn track_read(runtime: NodeId, signal: NodeId) -> bool {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.iter_mut().rev().find(|frame| frame.runtime == runtime) {
                Some(frame) if frame.computation.is_some() => {
                    frame.reads.insert(signal);
                    true
                }
                _ => false,
            }
        })
    }

    /// Queue a write touching `signals` on the innermost tracked frame of
    /// `runtime`.
    ///
    /// Hands the write back if there is no such frame, in which case the
    /// caller commits it immediately.
    pub(crate) fn defer_write(
        runtime: NodeId,
        signals: &[NodeId],
        write: PendingWrite,
    ) -> std::result::Result<(), PendingWrite> {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.iter_mut().rev().find(|frame| frame.runtime == runtime) {
                Some(frame) if frame.computation.is_some() => {
                    frame.written.extend(signals.iter().copied());
                    frame.writes.push(write);
                    Ok(())
                }
                _ => Err(write),
            }
        })
    }

    /// Signals read so far in the innermost frame.
    pub fn dependencies() -> Vec<NodeId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|frame| frame.reads.iter().copied().collect())
                .unwrap_or_default()
        })
    }

    /// Pop this frame and return what it observed.
    pub(crate) fn finish(mut self) -> Tracked {
        self.finished = true;
        match self.pop() {
            Some(frame) => Tracked {
                reads: frame.reads,
                written: frame.written,
                writes: frame.writes,
            },
            None => Tracked {
                reads: IndexSet::new(),
                written: IndexSet::new(),
                writes: Vec::new(),
            },
        }
    }

    fn pop(&self) -> Option<Frame> {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Verify we're popping the right context.
            if let Some(frame) = &popped {
                debug_assert!(
                    frame.runtime == self.runtime && frame.computation == self.computation,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.computation,
                    frame.computation
                );
            }
            popped
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_tracks_computation() {
        let runtime = NodeId::new();
        let id = NodeId::new();

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_computation(runtime).is_none());

        {
            let _ctx = ReactiveContext::enter(runtime, id);

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_computation(runtime), Some(id));
            assert!(ReactiveContext::is_tracking(runtime));
        }

        // Context should be cleaned up after drop
        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_computation(runtime).is_none());
    }

    #[test]
    fn context_tracks_reads_once() {
        let runtime = NodeId::new();
        let _ctx = ReactiveContext::enter(runtime, NodeId::new());

        let a = NodeId::new();
        let b = NodeId::new();
        assert!(ReactiveContext::track_read(runtime, a));
        assert!(ReactiveContext::track_read(runtime, b));
        assert!(ReactiveContext::track_read(runtime, a));

        assert_eq!(ReactiveContext::dependencies(), vec![a, b]);
    }

    #[test]
    fn nested_contexts() {
        let runtime = NodeId::new();
        let id1 = NodeId::new();
        let id2 = NodeId::new();

        {
            let _ctx1 = ReactiveContext::enter(runtime, id1);
            assert_eq!(ReactiveContext::current_computation(runtime), Some(id1));

            {
                let _ctx2 = ReactiveContext::enter(runtime, id2);
                assert_eq!(ReactiveContext::current_computation(runtime), Some(id2));
            }

            // After inner context drops, outer should be current
            assert_eq!(ReactiveContext::current_computation(runtime), Some(id1));
        }

        assert!(ReactiveContext::current_computation(runtime).is_none());
    }

    #[test]
    fn untracked_frame_suspends_tracking_but_keeps_owner() {
        let runtime = NodeId::new();
        let id = NodeId::new();
        let _ctx = ReactiveContext::enter(runtime, id);

        {
            let _untracked = ReactiveContext::untracked(runtime);
            assert!(!ReactiveContext::is_tracking(runtime));
            assert!(!ReactiveContext::track_read(runtime, NodeId::new()));
            assert_eq!(ReactiveContext::current_computation(runtime), Some(id));

            let write: PendingWrite = Box::new(|| Ok(()));
            assert!(ReactiveContext::defer_write(runtime, &[NodeId::new()], write).is_err());
        }

        assert!(ReactiveContext::is_tracking(runtime));
    }

    #[test]
    fn frames_of_other_runtimes_are_ignored() {
        let first = NodeId::new();
        let second = NodeId::new();
        let _ctx = ReactiveContext::enter(first, NodeId::new());

        assert!(!ReactiveContext::track_read(second, NodeId::new()));
        assert!(ReactiveContext::current_computation(second).is_none());
    }

    #[test]
    fn finish_returns_deferred_writes() {
        let runtime = NodeId::new();
        let signal = NodeId::new();
        let ctx = ReactiveContext::enter(runtime, NodeId::new());

        let other = NodeId::new();
        let write: PendingWrite = Box::new(|| Ok(()));
        assert!(ReactiveContext::defer_write(runtime, &[signal, other], write).is_ok());
        ReactiveContext::track_read(runtime, signal);

        let tracked = ctx.finish();
        assert!(tracked.reads.contains(&signal));
        assert_eq!(tracked.writes.len(), 1);
        assert_eq!(tracked.written.len(), 2);
        assert!(!ReactiveContext::is_active());
    }
}
