//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its callback immediately to establish
//!    initial dependencies. Its side effects are visible once the constructor
//!    returns.
//!
//! 2. When any dependency changes, the effect queues a run. Refreshes that
//!    arrive while a run is queued are coalesced.
//!
//! 3. The queued run happens synchronously on the refreshing thread, inside a
//!    fresh tracked evaluation that replaces the old dependency set.
//!
//! # Differences from Computed
//!
//! - Computed values publish a result; effects do not.
//! - Nothing can depend on an effect.
//!
//! # Lifetime
//!
//! An effect stops running when its context is disposed. An effect built
//! without an explicit context owns a private one, disposed when the last
//! handle is dropped, so keep the handle for as long as the effect should
//! stay live.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::context::{Disposable, LifetimeContext, ScopeOwner};
use super::subscriber::{CellId, Refreshable};
use super::tracker::{AccessTracker, EvaluationGuard};
use crate::error::Result;

struct EffectInner {
    callback: Box<dyn Fn() + Send + Sync>,
    tracker: AccessTracker,
    queued: Mutex<bool>,
    running: AtomicBool,
    run_count: AtomicUsize,
}

impl EffectInner {
    fn build<F>(context: &LifetimeContext, callback: F) -> Result<Arc<Self>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|me: &Weak<Self>| Self {
            callback: Box::new(callback),
            tracker: AccessTracker::new(me.clone(), context.clone()),
            queued: Mutex::new(true),
            running: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        });

        context.register(inner.clone())?;
        inner.run()?;
        debug!(subscriber = ?inner.tracker.subscriber_id(), "effect created");

        Ok(inner)
    }

    /// Run the callback while a run is queued.
    fn run(&self) -> Result<()> {
        let _serial = self.tracker.context().enter();
        loop {
            if self.running.load(Ordering::Acquire) || !*self.queued.lock() {
                return Ok(());
            }

            let _running = EvaluationGuard::enter(&self.running);
            self.tracker.track(|| {
                *self.queued.lock() = false;
                self.run_count.fetch_add(1, Ordering::Relaxed);
                (self.callback)();
            })?;
        }
    }

    fn queue(&self) -> bool {
        let mut queued = self.queued.lock();
        if *queued {
            return false;
        }
        *queued = true;
        true
    }
}

impl Refreshable for EffectInner {
    fn refresh(&self) {
        if !self.queue() {
            trace!(subscriber = ?self.tracker.subscriber_id(), "refresh coalesced");
            return;
        }

        if let Err(error) = self.run() {
            *self.queued.lock() = false;
            debug!(subscriber = ?self.tracker.subscriber_id(), %error, "effect run abandoned");
        }
    }

    fn on_dependency_disposed(&self, cell: CellId) {
        self.tracker.untrack(cell);
    }
}

impl Disposable for EffectInner {
    fn dispose(&self) {
        self.tracker.dispose();
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use parking_lot::Mutex;
/// use tether_core::reactive::{Effect, Signal};
///
/// let count = Signal::new(0);
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let _effect = {
///     let (count, seen) = (count.clone(), seen.clone());
///     Effect::new(move || seen.lock().push(count.get().unwrap_or_default())).unwrap()
/// };
///
/// count.set(5).unwrap();
/// assert_eq!(*seen.lock(), vec![0, 5]);
/// ```
#[must_use = "an effect stops running when its last handle is dropped"]
pub struct Effect {
    inner: Arc<EffectInner>,

    /// Present when the effect owns a private context.
    owner: Option<Arc<ScopeOwner>>,
}

impl Effect {
    /// Create an effect with its own private context.
    ///
    /// The callback runs once before this returns.
    pub fn new<F>(callback: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let context = LifetimeContext::new();
        let owner = ScopeOwner::new(context.clone());
        let inner = EffectInner::build(&context, callback)?;

        Ok(Self {
            inner,
            owner: Some(owner),
        })
    }

    /// Create an effect owned by `context`.
    ///
    /// The effect stays live until the context is disposed, even if this
    /// handle is dropped.
    pub fn new_in<F>(context: &LifetimeContext, callback: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = EffectInner::build(context, callback)?;
        Ok(Self { inner, owner: None })
    }

    /// The context this effect belongs to.
    pub fn context(&self) -> &LifetimeContext {
        self.inner.tracker.context()
    }

    /// Check if the effect's context has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.context().is_disposed()
    }

    /// Whether a run is queued but has not started.
    ///
    /// Always false once the context is disposed.
    pub fn is_run_queued(&self) -> bool {
        !self.is_disposed() && *self.inner.queued.lock()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::Relaxed)
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.tracker.dependency_count()
    }

    /// Whether `cell` was read during the last run.
    pub fn depends_on(&self, cell: CellId) -> bool {
        self.inner.tracker.depends_on(cell)
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            owner: self.owner.clone(),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("subscriber", &self.inner.tracker.subscriber_id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;
    use crate::reactive::{Computed, Signal};

    fn recorder() -> Arc<Mutex<Vec<i32>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn effect_runs_on_creation() {
        let effect = Effect::new(|| {}).unwrap();

        assert_eq!(effect.run_count(), 1);
        assert!(!effect.is_run_queued());
    }

    #[test]
    fn effect_reruns_on_change() {
        let signal = Signal::new(1);
        let log = recorder();
        let effect = {
            let (signal, log) = (signal.clone(), log.clone());
            Effect::new(move || log.lock().push(signal.get().unwrap())).unwrap()
        };

        signal.set(2).unwrap();
        signal.set(3).unwrap();

        assert_eq!(*log.lock(), vec![1, 2, 3]);
        assert_eq!(effect.run_count(), 3);
    }

    #[test]
    fn effect_ignores_equal_set() {
        let signal = Signal::new(1);
        let log = recorder();
        let effect = {
            let (signal, log) = (signal.clone(), log.clone());
            Effect::new(move || log.lock().push(signal.get().unwrap())).unwrap()
        };

        signal.set(1).unwrap();

        assert_eq!(*log.lock(), vec![1]);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_ignores_unread_signal() {
        let read = Signal::new(1);
        let unread = Signal::new(2);
        let effect = {
            let read = read.clone();
            Effect::new(move || {
                read.get().unwrap();
            })
            .unwrap()
        };

        unread.set(3).unwrap();

        assert_eq!(effect.run_count(), 1);
        assert!(effect.depends_on(read.id()));
        assert!(!effect.depends_on(unread.id()));
    }

    #[test]
    fn effect_follows_computed() {
        let signal = Signal::new(2);
        let squared = {
            let signal = signal.clone();
            Computed::new(move || signal.get().unwrap() * signal.get().unwrap()).unwrap()
        };
        let log = recorder();
        let _effect = {
            let (squared, log) = (squared.clone(), log.clone());
            Effect::new(move || log.lock().push(squared.get().unwrap())).unwrap()
        };

        signal.set(3).unwrap();

        assert_eq!(*log.lock(), vec![4, 9]);
    }

    #[test]
    fn effect_writing_its_own_dependency_runs_again_without_recursing() {
        let signal = Signal::new(0);
        let effect = {
            let signal = signal.clone();
            Effect::new(move || {
                let value = signal.get().unwrap();
                if value < 3 {
                    signal.set(value + 1).unwrap();
                }
            })
            .unwrap()
        };

        assert_eq!(signal.get().unwrap(), 3);
        assert_eq!(effect.run_count(), 4);
    }

    #[test]
    fn effect_stops_after_context_disposed() {
        let context = LifetimeContext::new();
        let signal = Signal::new(1);
        let log = recorder();
        let effect = {
            let (signal, log) = (signal.clone(), log.clone());
            Effect::new_in(&context, move || log.lock().push(signal.get().unwrap())).unwrap()
        };

        context.dispose();
        signal.set(2).unwrap();

        assert!(effect.is_disposed());
        assert_eq!(*log.lock(), vec![1]);
        assert_eq!(effect.dependency_count(), 0);
    }

    #[test]
    fn effect_in_context_outlives_dropped_handle() {
        let context = LifetimeContext::new();
        let signal = Signal::new(1);
        let log = recorder();
        {
            let (signal, log) = (signal.clone(), log.clone());
            let _ = Effect::new_in(&context, move || log.lock().push(signal.get().unwrap())).unwrap();
        }

        signal.set(2).unwrap();
        assert_eq!(*log.lock(), vec![1, 2]);

        context.dispose();
        signal.set(3).unwrap();
        assert_eq!(*log.lock(), vec![1, 2]);
    }

    #[test]
    fn dropping_private_effect_stops_it() {
        let signal = Signal::new(1);
        let log = recorder();
        let effect = {
            let (signal, log) = (signal.clone(), log.clone());
            Effect::new(move || log.lock().push(signal.get().unwrap())).unwrap()
        };

        drop(effect);
        signal.set(2).unwrap();

        assert_eq!(*log.lock(), vec![1]);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn effect_disposing_its_context_mid_run_leaves_nothing_queued() {
        let context = LifetimeContext::new();
        let signal = Signal::new(0);
        let effect = {
            let (signal, owner) = (signal.clone(), context.clone());
            Effect::new_in(&context, move || {
                if signal.get().unwrap() == 1 {
                    signal.set(2).unwrap();
                    owner.dispose();
                }
            })
            .unwrap()
        };

        signal.set(1).unwrap();

        assert!(effect.is_disposed());
        assert!(!effect.is_run_queued());
        assert!(!*effect.inner.queued.lock());
        assert_eq!(effect.run_count(), 2);
        assert_eq!(signal.get().unwrap(), 2);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn new_in_disposed_context_fails() {
        let context = LifetimeContext::new();
        context.dispose();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let result = Effect::new_in(&context, move || flag.store(true, Ordering::SeqCst));

        assert!(matches!(result, Err(ReactiveError::ContextDisposed)));
        assert!(!ran.load(Ordering::SeqCst));
    }
}
