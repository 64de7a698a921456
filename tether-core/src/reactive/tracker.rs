//! Access Tracker
//!
//! Every subscriber that runs tracked evaluations owns an [`AccessTracker`].
//! The tracker drives one evaluation at a time and keeps the subscriber's
//! dependency set equal to the cells read during its last completed
//! evaluation.
//!
//! Before an evaluation starts, the owner is removed from every cell it read
//! last time. The cells read this time re-register it as they are read. A
//! cell that the new evaluation skips therefore stops notifying the owner
//! immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use parking_lot::Mutex;
use tracing::trace;

use super::context::{Disposable, LifetimeContext};
use super::subscriber::{CellId, Refreshable, Subscriber, SubscriberId};
use super::tracking::{Dependencies, TrackingScope};
use crate::error::Result;

/// Drives tracked evaluations for one subscriber.
///
/// Computed values and effects own one each. External subscribers, such as a
/// render target that marshals refreshes to a UI thread, can own one too:
///
/// ```rust
/// use std::sync::{Arc, Weak};
/// use tether_core::reactive::{AccessTracker, CellId, LifetimeContext, Refreshable, Signal};
///
/// struct View {
///     tracker: AccessTracker,
/// }
///
/// impl Refreshable for View {
///     fn refresh(&self) { /* schedule a render */ }
///     fn on_dependency_disposed(&self, cell: CellId) { self.tracker.untrack(cell); }
/// }
///
/// let title = Signal::new("hello".to_string());
/// let view = Arc::new_cyclic(|me: &Weak<View>| View {
///     tracker: AccessTracker::new(me.clone(), LifetimeContext::new()),
/// });
///
/// let rendered = view.tracker.track(|| title.get().unwrap()).unwrap();
/// assert_eq!(rendered, "hello");
/// assert_eq!(view.tracker.dependency_count(), 1);
/// ```
pub struct AccessTracker {
    owner: Subscriber,
    context: LifetimeContext,
    dependencies: Mutex<Dependencies>,
}

impl AccessTracker {
    /// Create a tracker for `owner`, bound to `context`.
    pub fn new<R>(owner: Weak<R>, context: LifetimeContext) -> Self
    where
        R: Refreshable + 'static,
    {
        let owner: Weak<dyn Refreshable> = owner;
        Self {
            owner: Subscriber::new(owner),
            context,
            dependencies: Mutex::new(Dependencies::default()),
        }
    }

    /// The subscriber ID cells see for this tracker's owner.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.owner.id()
    }

    /// The context this tracker is bound to.
    pub fn context(&self) -> &LifetimeContext {
        &self.context
    }

    /// Run `evaluate` as a tracked evaluation of the owner.
    ///
    /// The owner is first unregistered from its previous dependencies. Fails
    /// with [`ContextDisposed`](crate::ReactiveError::ContextDisposed) if the
    /// context has been torn down. On success the cells read by `evaluate`
    /// become the new dependency set.
    ///
    /// Runs under the context's lock. A panic in `evaluate` propagates; the
    /// frame is popped on the way out and the cells read so far forget the
    /// owner.
    pub fn track<F, T>(&self, evaluate: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        let _serial = self.context.enter();

        self.untrack_all();
        self.context.assert_not_disposed()?;

        let frame = TrackingScope::push(self.owner.clone());
        let value = evaluate();
        let reads = frame.finish();

        // `evaluate` may have disposed the context; nothing would remove
        // these edges later.
        if self.context.is_disposed() {
            reads.unregister(self.owner.id());
            return Ok(value);
        }

        trace!(subscriber = ?self.owner.id(), dependencies = reads.len(), "evaluation tracked");
        *self.dependencies.lock() = reads;

        Ok(value)
    }

    /// Drop a single cell from the dependency set.
    ///
    /// Called when the cell is disposed, so the tracker does not wait for the
    /// next evaluation to forget it.
    pub fn untrack(&self, cell: CellId) {
        if self.dependencies.lock().remove(cell) {
            trace!(subscriber = ?self.owner.id(), cell = cell.raw(), "dependency untracked");
        }
    }

    /// Number of cells read during the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.dependencies.lock().len()
    }

    /// Whether `cell` was read during the last evaluation.
    pub fn depends_on(&self, cell: CellId) -> bool {
        self.dependencies.lock().contains(cell)
    }

    /// Snapshot of the current dependency set.
    pub fn dependencies(&self) -> Dependencies {
        self.dependencies.lock().clone()
    }

    fn untrack_all(&self) {
        let previous = std::mem::take(&mut *self.dependencies.lock());
        trace!(subscriber = ?self.owner.id(), dependencies = previous.len(), "unregistering");
        previous.unregister(self.owner.id());
    }
}

impl Disposable for AccessTracker {
    fn dispose(&self) {
        self.untrack_all();
    }
}

impl std::fmt::Debug for AccessTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTracker")
            .field("subscriber", &self.owner.id())
            .field("dependencies", &*self.dependencies.lock())
            .finish()
    }
}

/// Marks a node as mid-evaluation on the current thread.
///
/// A refresh that reaches the node while the flag is up comes from the
/// evaluation itself; it leaves the queue flag set and the running evaluation
/// loops once more instead of recursing.
pub(crate) struct EvaluationGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> EvaluationGuard<'a> {
    pub(crate) fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self { flag }
    }
}

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
