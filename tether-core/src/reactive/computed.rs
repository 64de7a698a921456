//! Computed Implementation
//!
//! A Computed is a cached derived value. It subscribes to every cell its
//! provider reads and publishes its own result through a backing signal, so
//! other computed values and effects can depend on it like on any cell.
//!
//! # How Computed Values Work
//!
//! 1. On construction, the provider runs once inside a tracked evaluation.
//!    The result seeds the backing signal.
//!
//! 2. When a dependency changes, the node is refreshed. The first refresh of
//!    a burst queues an evaluation; further refreshes while it is queued are
//!    coalesced.
//!
//! 3. A queued evaluation settles right away on the refreshing thread: the
//!    queue flag is cleared, the provider re-runs, and the result is stored
//!    in the backing signal. If it differs from the previous value, the
//!    node's own subscribers are refreshed in turn.
//!
//! 4. `get` settles a pending evaluation before returning, so a cached value
//!    is never observed stale.
//!
//! # Thread Safety
//!
//! The queue flag has its own lock, separate from every cell lock. Evaluation
//! runs under the context lock, so one node never evaluates on two threads at
//! once. A change that lands while an evaluation is running sets the flag
//! again and produces exactly one more evaluation.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::context::{Disposable, LifetimeContext, ScopeOwner};
use super::signal::{ReadSignal, Signal};
use super::subscriber::{CellId, Refreshable};
use super::tracker::{AccessTracker, EvaluationGuard};
use crate::error::Result;

/// Observable state of a computed value.
///
/// A node is uninitialized only while its constructor runs its first
/// evaluation; a handle is never returned before that completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cached value reflects the current dependencies.
    Valid,

    /// A dependency changed and the next evaluation has not started yet.
    EvaluationQueued,

    /// The owning context has been disposed.
    Disposed,
}

struct ComputedInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    provider: Box<dyn Fn() -> T + Send + Sync>,
    tracker: AccessTracker,

    /// Publishes results to downstream subscribers. Set once the first
    /// evaluation has finished.
    backing: OnceLock<Signal<T>>,

    /// Guarded by its own lock, never taken while holding a cell lock.
    queued: Mutex<bool>,

    evaluating: AtomicBool,
    evaluations: AtomicUsize,

    /// Sequence number of the latest evaluation, taken under the context lock.
    epoch: AtomicU64,

    /// Sequence number of the value currently in `backing`. Results from an
    /// older evaluation that lose the race to publish are dropped.
    published: Mutex<u64>,
}

impl<T> ComputedInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn build<F>(context: &LifetimeContext, provider: F) -> Result<(Arc<Self>, Signal<T>)>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|me: &Weak<Self>| Self {
            provider: Box::new(provider),
            tracker: AccessTracker::new(me.clone(), context.clone()),
            backing: OnceLock::new(),
            queued: Mutex::new(false),
            evaluating: AtomicBool::new(false),
            evaluations: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            published: Mutex::new(0),
        });

        let backing = {
            let _serial = context.enter();
            context.register(inner.clone())?;

            let value = inner.evaluate()?;
            let backing = Signal::new_in(context, value)?;
            let _ = inner.backing.set(backing.clone());
            backing
        };

        // Settles anything the first evaluation queued on itself.
        inner.settle()?;

        Ok((inner, backing))
    }

    /// Run the provider once as a tracked evaluation.
    fn evaluate(&self) -> Result<T> {
        let _running = EvaluationGuard::enter(&self.evaluating);
        self.tracker.track(|| {
            *self.queued.lock() = false;
            self.evaluations.fetch_add(1, Ordering::Relaxed);
            (self.provider)()
        })
    }

    /// Set the queue flag. Returns false if it was already set.
    fn queue(&self) -> bool {
        let mut queued = self.queued.lock();
        if *queued {
            return false;
        }
        *queued = true;
        true
    }

    fn is_queued(&self) -> bool {
        *self.queued.lock()
    }

    /// Evaluate and publish until no evaluation is queued.
    ///
    /// Takes the context lock only when an evaluation is queued, so reading a
    /// settled value from inside another context's evaluation never waits.
    fn settle(&self) -> Result<()> {
        loop {
            if !self.is_queued() {
                return Ok(());
            }

            let (value, epoch) = {
                let _serial = self.tracker.context().enter();
                if self.evaluating.load(Ordering::Acquire) || !self.is_queued() {
                    return Ok(());
                }
                let value = self.evaluate()?;
                (value, self.epoch.fetch_add(1, Ordering::AcqRel) + 1)
            };

            self.publish(value, epoch)?;
        }
    }

    /// Store an evaluation result and refresh downstream subscribers.
    ///
    /// Runs outside the context lock, so two threads may publish out of
    /// order; the older result is discarded.
    fn publish(&self, value: T, epoch: u64) -> Result<()> {
        let Some(backing) = self.backing.get() else {
            return Ok(());
        };

        let subscribers = {
            let mut published = self.published.lock();
            if epoch < *published {
                trace!(subscriber = ?self.tracker.subscriber_id(), epoch, "stale result dropped");
                return Ok(());
            }
            *published = epoch;
            backing.replace(value)?
        };

        for subscriber in subscribers {
            subscriber.refresh();
        }
        Ok(())
    }
}

impl<T> Refreshable for ComputedInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn refresh(&self) {
        if !self.queue() {
            trace!(subscriber = ?self.tracker.subscriber_id(), "refresh coalesced");
            return;
        }

        if let Err(error) = self.settle() {
            debug!(subscriber = ?self.tracker.subscriber_id(), %error, "computed refresh abandoned");
        }
    }

    fn on_dependency_disposed(&self, cell: CellId) {
        self.tracker.untrack(cell);
    }
}

impl<T> Disposable for ComputedInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn dispose(&self) {
        self.tracker.dispose();
    }
}

/// A cached derived value that recomputes when its dependencies change.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be Clone + Send + Sync + PartialEq.
///
/// The PartialEq bound is needed to detect when the computed value actually
/// changed; an unchanged result does not notify downstream subscribers.
///
/// # Example
///
/// ```rust
/// use tether_core::reactive::{Computed, Signal};
///
/// let count = Signal::new(2);
/// let doubled = {
///     let count = count.clone();
///     Computed::new(move || count.get().unwrap_or_default() * 2).unwrap()
/// };
///
/// assert_eq!(doubled.get().unwrap(), 4);
/// count.set(5).unwrap();
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
#[must_use = "a computed value is disposed when its last handle is dropped"]
pub struct Computed<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: Arc<ComputedInner<T>>,

    /// Handle to the backing signal, always initialized.
    value: Signal<T>,

    /// Present when the computed value owns a private context.
    owner: Option<Arc<ScopeOwner>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a computed value with its own private context.
    ///
    /// The provider runs once before this returns. The private context is
    /// disposed when the last clone of the handle is dropped.
    pub fn new<F>(provider: F) -> Result<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let context = LifetimeContext::new();
        let owner = ScopeOwner::new(context.clone());
        let (inner, value) = ComputedInner::build(&context, provider)?;

        Ok(Self {
            inner,
            value,
            owner: Some(owner),
        })
    }

    /// Create a computed value owned by `context`.
    ///
    /// Fails if the context has already been disposed.
    pub fn new_in<F>(context: &LifetimeContext, provider: F) -> Result<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        context.assert_not_disposed()?;
        let (inner, value) = ComputedInner::build(context, provider)?;

        Ok(Self {
            inner,
            value,
            owner: None,
        })
    }

    /// Get the current value, settling a queued evaluation first.
    ///
    /// Inside a tracked evaluation this registers the caller as a dependent.
    pub fn get(&self) -> Result<T> {
        self.context().assert_not_disposed()?;
        self.inner.settle()?;
        self.value.get()
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> Result<T> {
        self.context().assert_not_disposed()?;
        self.inner.settle()?;
        self.value.get_untracked()
    }

    /// Get the current state.
    pub fn state(&self) -> ComputedState {
        if self.context().is_disposed() {
            ComputedState::Disposed
        } else if self.inner.is_queued() {
            ComputedState::EvaluationQueued
        } else {
            ComputedState::Valid
        }
    }

    /// The ID of the backing cell that dependents subscribe to.
    pub fn id(&self) -> CellId {
        self.value.id()
    }

    /// The context this computed value belongs to.
    pub fn context(&self) -> &LifetimeContext {
        self.inner.tracker.context()
    }

    /// Number of cells read during the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner.tracker.dependency_count()
    }

    /// Whether `cell` was read during the last evaluation.
    pub fn depends_on(&self, cell: CellId) -> bool {
        self.inner.tracker.depends_on(cell)
    }

    /// Number of subscribers reading this value.
    pub fn subscriber_count(&self) -> usize {
        self.value.subscriber_count()
    }

    /// Number of times the provider has run.
    pub fn evaluation_count(&self) -> usize {
        self.inner.evaluations.load(Ordering::Relaxed)
    }
}

impl<T> ReadSignal<T> for Computed<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn get(&self) -> Result<T> {
        Computed::get(self)
    }

    fn get_untracked(&self) -> Result<T> {
        Computed::get_untracked(self)
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            value: self.value.clone(),
            owner: self.owner.clone(),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("evaluations", &self.evaluation_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
