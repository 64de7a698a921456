//! Tracking Scope
//!
//! The tracking scope records which cells a computation reads while it runs.
//! This is what makes dependency discovery implicit: a computed value or an
//! effect never declares its inputs, the scope observes them.
//!
//! # Implementation
//!
//! Each thread owns a stack of frames. Entering a tracked evaluation pushes a
//! frame naming the subscriber; every cell read on this thread while the frame
//! is on top is added to the frame's read set and gets the subscriber added to
//! its own subscriber set. Finishing the evaluation pops the frame and hands
//! the read set to the subscriber's [`AccessTracker`](super::AccessTracker).
//!
//! Frames nest: a computed value read from inside an effect pushes its own
//! frame, and reads made during the inner evaluation attribute to the inner
//! frame only.
//!
//! The stack is never shared across threads. Popping is tied to a guard so
//! the stack stays balanced when user code panics.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use tracing::trace;

use super::subscriber::{CellId, Subscriber, SubscriberId};

thread_local! {
    static FRAME_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// The type-erased side of a cell that trackers need: identity and the
/// ability to drop a subscriber.
pub(crate) trait Source: Send + Sync {
    fn cell_id(&self) -> CellId;

    fn unregister_subscriber(&self, subscriber: SubscriberId);
}

/// An entry in the frame stack.
struct Frame {
    subscriber: Subscriber,
    reads: Dependencies,
}

/// The set of cells read during one evaluation.
///
/// Holds non-owning references only. A cell that has been dropped since the
/// read is simply skipped when the set is walked.
#[derive(Default, Clone)]
pub struct Dependencies {
    cells: IndexMap<CellId, Weak<dyn Source>>,
}

impl Dependencies {
    /// Number of distinct cells in the set.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether `cell` is in the set.
    pub fn contains(&self, cell: CellId) -> bool {
        self.cells.contains_key(&cell)
    }

    /// The cell IDs in first-read order.
    pub fn ids(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.keys().copied()
    }

    pub(crate) fn insert(&mut self, cell: CellId, source: Weak<dyn Source>) {
        self.cells.entry(cell).or_insert(source);
    }

    pub(crate) fn remove(&mut self, cell: CellId) -> bool {
        self.cells.shift_remove(&cell).is_some()
    }

    /// The cells that are still alive.
    pub(crate) fn sources(&self) -> impl Iterator<Item = Arc<dyn Source>> + '_ {
        self.cells.values().filter_map(Weak::upgrade)
    }

    /// Remove `subscriber` from every cell in the set that is still alive.
    pub(crate) fn unregister(&self, subscriber: SubscriberId) {
        for source in self.sources() {
            source.unregister_subscriber(subscriber);
        }
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.cells.keys()).finish()
    }
}

/// Namespace for the per-thread frame stack.
pub struct TrackingScope;

impl TrackingScope {
    /// Open a frame for `subscriber`.
    ///
    /// Reads on this thread attribute to the new frame until the returned
    /// guard is finished or dropped.
    pub fn push(subscriber: Subscriber) -> TrackingFrame {
        let id = subscriber.id();
        FRAME_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                subscriber,
                reads: Dependencies::default(),
            });
        });

        TrackingFrame {
            subscriber: id,
            finished: false,
        }
    }

    /// Check if there is an active frame on this thread.
    pub fn is_active() -> bool {
        FRAME_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Get the subscriber ID of the innermost frame, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        FRAME_STACK.with(|stack| stack.borrow().last().map(|frame| frame.subscriber.id()))
    }

    /// Current nesting depth on this thread.
    pub fn depth() -> usize {
        FRAME_STACK.with(|stack| stack.borrow().len())
    }

    /// Record a read of `cell` in the innermost frame.
    ///
    /// Returns the frame's subscriber so the caller can add it to the cell's
    /// subscriber set while still holding the cell lock. Returns `None` when
    /// no frame is active; reading outside a tracked evaluation creates no
    /// edge.
    pub(crate) fn register<F>(cell: CellId, source: F) -> Option<Subscriber>
    where
        F: FnOnce() -> Weak<dyn Source>,
    {
        FRAME_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let frame = stack.last_mut()?;
            frame.reads.insert(cell, source());
            trace!(cell = cell.raw(), subscriber = ?frame.subscriber.id(), "read recorded");
            Some(frame.subscriber.clone())
        })
    }

    /// Pop the innermost frame and return its read set.
    ///
    /// An empty stack yields an empty set.
    fn pop() -> (Subscriber, Dependencies) {
        FRAME_STACK
            .try_with(|stack| stack.borrow_mut().pop())
            .ok()
            .flatten()
            .map(|frame| (frame.subscriber, frame.reads))
            .unwrap_or_else(|| (Subscriber::detached(), Dependencies::default()))
    }
}

/// Guard for an open frame.
///
/// [`finish`](Self::finish) pops the frame and returns what was read. If the
/// guard is dropped instead (for instance while unwinding from a panic in user
/// code), the frame is popped and its subscriber is removed from every cell it
/// read, since no tracker will ever learn about those edges.
#[must_use = "dropping the frame discards the recorded reads"]
pub struct TrackingFrame {
    subscriber: SubscriberId,
    finished: bool,
}

impl TrackingFrame {
    /// Close the frame and take its read set.
    pub fn finish(mut self) -> Dependencies {
        self.finished = true;
        let (subscriber, reads) = TrackingScope::pop();
        debug_assert_eq!(
            subscriber.id(),
            self.subscriber,
            "TrackingFrame mismatch: expected {:?}, got {:?}",
            self.subscriber,
            subscriber.id()
        );
        reads
    }
}

impl Drop for TrackingFrame {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let (subscriber, reads) = TrackingScope::pop();
        trace!(subscriber = ?subscriber.id(), dependencies = reads.len(), "abandoned frame");
        reads.unregister(subscriber.id());
    }
}
