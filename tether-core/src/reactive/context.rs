//! Lifetime Context
//!
//! A lifetime context owns a group of reactive resources and tears them down
//! together. Cells, computed values and effects register themselves with a
//! context on construction; disposing the context disposes each of them in
//! registration order and makes every later operation on them fail with
//! [`ReactiveError::ContextDisposed`].
//!
//! # Ownership
//!
//! The context holds strong references to its resources. Graph edges between
//! cells and subscribers are non-owning, so a resource lives exactly as long
//! as its context keeps it (or a user handle does). Disposal drops the
//! context's references, which is what breaks the resource → context →
//! resource cycle.
//!
//! Resources built without an explicit context get a private one, tied to the
//! resource's handles through a [`ScopeOwner`]: dropping the last handle
//! disposes the private context.
//!
//! # Locking
//!
//! Each context carries one re-entrant lock. Registration, disposal and
//! tracked evaluations of the context's subscribers all run under it, so an
//! evaluation never overlaps disposal of its own context. Re-entrancy lets a
//! computed value read another computed value of the same context.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::debug;

use crate::error::{ReactiveError, Result};

/// A resource whose lifetime is bound to a [`LifetimeContext`].
pub trait Disposable: Send + Sync {
    /// Release the resource. Called once, under the owning context's lock.
    fn dispose(&self);
}

type Registry = RefCell<Vec<Arc<dyn Disposable>>>;

/// Guard held while a context is serialized.
pub(crate) type ContextGuard<'a> = ReentrantMutexGuard<'a, Registry>;

struct ContextInner {
    id: u64,
    disposed: AtomicBool,
    registry: ReentrantMutex<Registry>,
}

/// Shared lifetime scope for a group of reactive resources.
///
/// Cloning yields another handle to the same context.
///
/// An explicit context that is never disposed keeps its resources alive. Call
/// [`dispose`](Self::dispose) when the owner goes away.
#[derive(Clone)]
pub struct LifetimeContext {
    inner: Arc<ContextInner>,
}

impl LifetimeContext {
    /// Create a new, live context.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self {
            inner: Arc::new(ContextInner {
                id: COUNTER.fetch_add(1, Ordering::Relaxed),
                disposed: AtomicBool::new(false),
                registry: ReentrantMutex::new(RefCell::new(Vec::new())),
            }),
        }
    }

    /// Get the context's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Register a resource to be disposed with this context.
    ///
    /// Fails if the context has already been disposed.
    pub fn register(&self, disposable: Arc<dyn Disposable>) -> Result<()> {
        let registry = self.enter();
        self.assert_not_disposed()?;
        registry.borrow_mut().push(disposable);
        Ok(())
    }

    /// Dispose every registered resource in registration order.
    ///
    /// Idempotent: only the first call does anything.
    pub fn dispose(&self) {
        let registry = self.enter();
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let disposables = std::mem::take(&mut *registry.borrow_mut());
        debug!(context = self.inner.id, disposables = disposables.len(), "disposing context");
        for disposable in disposables {
            disposable.dispose();
        }
    }

    /// Fail with [`ReactiveError::ContextDisposed`] once disposed.
    pub fn assert_not_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(ReactiveError::ContextDisposed);
        }
        Ok(())
    }

    /// Whether the context has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Number of resources currently registered.
    pub fn len(&self) -> usize {
        self.enter().borrow().len()
    }

    /// Whether no resources are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles refer to the same context.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Serialize against registration, disposal and other tracked evaluations
    /// of this context. Re-entrant on the same thread.
    pub(crate) fn enter(&self) -> ContextGuard<'_> {
        self.inner.registry.lock()
    }
}

impl Default for LifetimeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LifetimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifetimeContext")
            .field("id", &self.inner.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Disposes a private context when the last resource handle goes away.
pub(crate) struct ScopeOwner {
    context: LifetimeContext,
}

impl ScopeOwner {
    pub(crate) fn new(context: LifetimeContext) -> Arc<Self> {
        Arc::new(Self { context })
    }
}

impl Drop for ScopeOwner {
    fn drop(&mut self) {
        self.context.dispose();
    }
}
