//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read inside a tracked evaluation, the signal records
//!    itself in the evaluation's frame and adds the evaluating subscriber to
//!    its own subscriber set.
//!
//! 2. When a signal's value changes, the subscriber set is swapped out for an
//!    empty one and every captured subscriber is refreshed. Subscribers that
//!    still care re-register by reading the signal again.
//!
//! 3. Setting a value equal to the current one is a no-op.
//!
//! # Thread Safety
//!
//! The value and the subscriber set sit behind one per-signal mutex, so every
//! read-and-register and every write-and-swap is atomic. Refreshes run after
//! the mutex is released; a subscriber may read or write the same signal from
//! inside its refresh.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use super::context::{Disposable, LifetimeContext, ScopeOwner};
use super::subscriber::{CellId, Subscriber, SubscriberId};
use super::tracking::{Source, TrackingScope};
use crate::error::Result;

/// Decides whether a new value counts as a change.
///
/// Returns `true` when the two values are equal, which suppresses
/// notification.
pub type Comparator<T> = fn(&T, &T) -> bool;

/// Read access shared by [`Signal`] and [`Computed`](super::Computed).
pub trait ReadSignal<T> {
    /// Read the value, registering a dependency if a tracked evaluation is
    /// running on this thread.
    fn get(&self) -> Result<T>;

    /// Read the value without registering a dependency.
    fn get_untracked(&self) -> Result<T>;
}

struct CellState<T> {
    value: T,
    subscribers: HashMap<SubscriberId, Subscriber>,
}

pub(crate) struct CellInner<T> {
    id: CellId,
    context: LifetimeContext,
    equals: Comparator<T>,
    state: Mutex<CellState<T>>,
}

impl<T> CellInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new(value: T, context: LifetimeContext, equals: Comparator<T>) -> Arc<Self> {
        Arc::new(Self {
            id: CellId::new(),
            context,
            equals,
            state: Mutex::new(CellState {
                value,
                subscribers: HashMap::new(),
            }),
        })
    }
}

impl<T> Source for CellInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn cell_id(&self) -> CellId {
        self.id
    }

    fn unregister_subscriber(&self, subscriber: SubscriberId) {
        self.state.lock().subscribers.remove(&subscriber);
    }
}

impl<T> Disposable for CellInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn dispose(&self) {
        let subscribers: SmallVec<[Subscriber; 4]> = {
            let mut state = self.state.lock();
            state.subscribers.drain().map(|(_, subscriber)| subscriber).collect()
        };

        trace!(cell = self.id.raw(), subscribers = subscribers.len(), "cell disposed");
        for subscriber in subscribers {
            subscriber.dependency_disposed(self.id);
        }
    }
}

/// A reactive signal holding a value of type T.
///
/// # Type Parameters
///
/// - `T`: The type of value stored in the signal. Must be Clone + Send + Sync.
///
/// # Example
///
/// ```rust
/// use tether_core::reactive::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get().unwrap(), 0);
///
/// // Update the value (notifies subscribers)
/// count.set(5).unwrap();
/// assert_eq!(count.get().unwrap(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<CellInner<T>>,

    /// Present when the signal owns a private context.
    owner: Option<Arc<ScopeOwner>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a signal with its own private context.
    ///
    /// The private context is disposed when the last clone of the signal is
    /// dropped.
    pub fn new(value: T) -> Self {
        Self::with_comparator(value, <T as PartialEq>::eq)
    }

    /// Create a signal owned by `context`.
    pub fn new_in(context: &LifetimeContext, value: T) -> Result<Self> {
        Self::with_comparator_in(context, value, <T as PartialEq>::eq)
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a signal with a custom equality test and a private context.
    pub fn with_comparator(value: T, equals: Comparator<T>) -> Self {
        let context = LifetimeContext::new();
        let inner = CellInner::new(value, context.clone(), equals);
        // A fresh context cannot have been disposed yet.
        let _ = context.register(inner.clone());

        Self {
            inner,
            owner: Some(ScopeOwner::new(context)),
        }
    }

    /// Create a signal with a custom equality test, owned by `context`.
    pub fn with_comparator_in(
        context: &LifetimeContext,
        value: T,
        equals: Comparator<T>,
    ) -> Result<Self> {
        let inner = CellInner::new(value, context.clone(), equals);
        context.register(inner.clone())?;

        Ok(Self { inner, owner: None })
    }

    /// Create a signal that treats every `set` as a change.
    ///
    /// Useful for types without a meaningful equality.
    pub fn always_notify(value: T) -> Self {
        Self::with_comparator(value, |_, _| false)
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// The context this signal belongs to.
    pub fn context(&self) -> &LifetimeContext {
        &self.inner.context
    }

    /// Get the current value.
    ///
    /// If called within a tracked evaluation, this also registers the
    /// evaluating subscriber as a dependent. Both happen under the signal's
    /// lock.
    pub fn get(&self) -> Result<T> {
        let mut state = self.inner.state.lock();
        self.inner.context.assert_not_disposed()?;

        if let Some(subscriber) = TrackingScope::register(self.inner.id, || self.as_source()) {
            state.subscribers.insert(subscriber.id(), subscriber);
        }

        Ok(state.value.clone())
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> Result<T> {
        let state = self.inner.state.lock();
        self.inner.context.assert_not_disposed()?;
        Ok(state.value.clone())
    }

    /// Set a new value and notify subscribers.
    ///
    /// Subscribers are refreshed on the calling thread after the signal's
    /// lock is released. An equal value is ignored.
    pub fn set(&self, value: T) -> Result<()> {
        let subscribers = self.replace(value)?;
        self.notify(subscribers);
        Ok(())
    }

    /// Update the value using a function of the current value.
    ///
    /// Read, compute and store happen as one step under the signal's lock, so
    /// concurrent updates never overwrite each other. `f` must not access
    /// this signal.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        let subscribers = self.store_with(f)?;
        self.notify(subscribers);
        Ok(())
    }

    /// Store `value` and hand back the subscribers to refresh.
    ///
    /// Nothing is returned for an equal value. The caller refreshes the
    /// returned subscribers once it holds no locks.
    pub(crate) fn replace(&self, value: T) -> Result<SmallVec<[Subscriber; 4]>> {
        self.store_with(|_| value)
    }

    fn store_with<F>(&self, f: F) -> Result<SmallVec<[Subscriber; 4]>>
    where
        F: FnOnce(&T) -> T,
    {
        let mut state = self.inner.state.lock();
        self.inner.context.assert_not_disposed()?;

        let value = f(&state.value);
        if (self.inner.equals)(&state.value, &value) {
            return Ok(SmallVec::new());
        }

        state.value = value;
        Ok(state.subscribers.drain().map(|(_, subscriber)| subscriber).collect())
    }

    fn notify(&self, subscribers: SmallVec<[Subscriber; 4]>) {
        if subscribers.is_empty() {
            return;
        }

        trace!(cell = self.inner.id.raw(), subscribers = subscribers.len(), "value changed");
        for subscriber in subscribers {
            subscriber.refresh();
        }
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }

    /// Whether `subscriber` is currently registered on this signal.
    pub fn has_subscriber(&self, subscriber: SubscriberId) -> bool {
        self.inner.state.lock().subscribers.contains_key(&subscriber)
    }

    fn as_source(&self) -> Weak<dyn Source> {
        let weak: Weak<dyn Source> = Arc::downgrade(&self.inner) as Weak<dyn Source>;
        weak
    }
}

impl<T> ReadSignal<T> for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> Result<T> {
        Signal::get(self)
    }

    fn get_untracked(&self) -> Result<T> {
        Signal::get_untracked(self)
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            owner: self.owner.clone(),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked().ok())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
