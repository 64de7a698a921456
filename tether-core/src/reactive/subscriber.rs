//! Subscriber types for the reactive system.
//!
//! A subscriber is anything that wants to hear about changes to the cells it
//! read: computed values, effects, and external render targets. Subscribers
//! implement [`Refreshable`]; cells only ever hold a [`Subscriber`], which is
//! a non-owning handle to one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

/// Unique identifier for a subscriber.
///
/// Each subscriber (computed, effect, or other tracked computation) gets a
/// unique ID when created. Cells key their subscriber sets by this ID so a
/// subscriber that reads a cell several times is registered once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a signal cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(u64);

impl CellId {
    /// Generate a new unique cell ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

/// The contract a participant in the dependency graph implements.
///
/// `refresh` is delivered synchronously on the thread that committed the
/// change. Implementers that need another thread (a UI dispatcher, say) are
/// responsible for marshaling the work themselves.
pub trait Refreshable: Send + Sync {
    /// A cell read during the last evaluation has changed.
    fn refresh(&self);

    /// A cell read during the last evaluation has been disposed together with
    /// its context. The subscriber should drop its reference to `cell`.
    fn on_dependency_disposed(&self, cell: CellId);
}

/// A non-owning handle to a [`Refreshable`].
///
/// Cells store these in their subscriber sets. The handle never keeps the
/// target alive; a target that has already been dropped is skipped.
#[derive(Clone)]
pub struct Subscriber {
    id: SubscriberId,
    target: Weak<dyn Refreshable>,
}

impl Subscriber {
    /// Create a subscriber handle for `target` under a fresh ID.
    pub fn new(target: Weak<dyn Refreshable>) -> Self {
        Self {
            id: SubscriberId::new(),
            target,
        }
    }

    /// A handle that points at nothing. Notifying it is a no-op.
    pub(crate) fn detached() -> Self {
        let target: Weak<dyn Refreshable> = Weak::<Detached>::new();
        Self::new(target)
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the target is still alive.
    pub fn is_live(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Deliver a refresh to the target, if it still exists.
    pub fn refresh(&self) {
        if let Some(target) = self.target.upgrade() {
            target.refresh();
        }
    }

    /// Tell the target that `cell` is gone.
    pub fn dependency_disposed(&self, cell: CellId) {
        if let Some(target) = self.target.upgrade() {
            target.on_dependency_disposed(cell);
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}

struct Detached;

impl Refreshable for Detached {
    fn refresh(&self) {}

    fn on_dependency_disposed(&self, _cell: CellId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Arc;

    struct Probe {
        refreshed: AtomicUsize,
        disposed: AtomicBool,
    }

    impl Refreshable for Probe {
        fn refresh(&self) {
            self.refreshed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_dependency_disposed(&self, _cell: CellId) {
            self.disposed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn subscriber_forwards_to_live_target() {
        let probe = Arc::new(Probe {
            refreshed: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        });
        let weak: Weak<dyn Refreshable> = Arc::downgrade(&probe) as Weak<dyn Refreshable>;
        let subscriber = Subscriber::new(weak);

        subscriber.refresh();
        subscriber.dependency_disposed(CellId::new());

        assert_eq!(probe.refreshed.load(Ordering::SeqCst), 1);
        assert!(probe.disposed.load(Ordering::SeqCst));
    }

    #[test]
    fn subscriber_does_not_keep_target_alive() {
        let probe = Arc::new(Probe {
            refreshed: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        });
        let weak: Weak<dyn Refreshable> = Arc::downgrade(&probe) as Weak<dyn Refreshable>;
        let subscriber = Subscriber::new(weak);

        assert!(subscriber.is_live());
        drop(probe);
        assert!(!subscriber.is_live());

        // Notifying a dead target is a no-op.
        subscriber.refresh();
    }

    #[test]
    fn detached_subscriber_is_never_live() {
        let subscriber = Subscriber::detached();
        assert!(!subscriber.is_live());
        subscriber.refresh();
    }
}
