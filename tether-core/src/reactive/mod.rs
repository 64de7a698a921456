//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computed values,
//! effects, and the lifetime contexts that own them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracked evaluation (such as a computed value or an effect), the
//! signal automatically registers the evaluating subscriber as a dependent.
//! When the signal's value changes, those dependents are refreshed.
//!
//! ## Computed Values
//!
//! A Computed is a derived value that caches its result. It re-evaluates only
//! when one of the cells it read last time changes, and notifies its own
//! dependents only when the result actually differs.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change. Effects are used to synchronize reactive state with
//! external systems.
//!
//! ## Lifetime Contexts
//!
//! A LifetimeContext groups resources that should be torn down together.
//! Disposing it unhooks every member from the graph and makes later reads and
//! writes fail with [`ReactiveError::ContextDisposed`](crate::ReactiveError).
//!
//! # Implementation Notes
//!
//! Dependency discovery uses a thread-local stack of tracking frames. A read
//! records the cell in the innermost frame and the frame's subscriber in the
//! cell, so dependency sets are exact and are rebuilt on every evaluation.
//!
//! Propagation is synchronous: `set` refreshes subscribers on the calling
//! thread, and the cascade through computed values and effects completes
//! before `set` returns. There is no scheduler.

mod computed;
mod context;
mod effect;
mod signal;
mod subscriber;
mod tracker;
mod tracking;

pub use computed::{Computed, ComputedState};
pub use context::{Disposable, LifetimeContext};
pub use effect::Effect;
pub use signal::{Comparator, ReadSignal, Signal};
pub use subscriber::{CellId, Refreshable, Subscriber, SubscriberId};
pub use tracker::AccessTracker;
pub use tracking::{Dependencies, TrackingFrame, TrackingScope};
