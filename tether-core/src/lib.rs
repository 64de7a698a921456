//! Tether Core
//!
//! This crate provides a fine-grained reactive dependency-tracking engine.
//! It implements:
//!
//! - Mutable value cells (signals) with change notification
//! - Memoized derived values (computed) with exact, dynamic dependencies
//! - Side-effecting subscribers (effects)
//! - Lifetime contexts that tear groups of resources down together
//!
//! Everything is synchronous and thread-safe. A write refreshes dependents on
//! the writing thread; there is no scheduler, batching API, or persistence.
//!
//! # Architecture
//!
//! - `reactive`: the primitives and the thread-local tracking machinery
//! - `error`: the error type shared by every gated operation
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use tether_core::reactive::{Computed, Effect, Signal};
//!
//! // Create a signal
//! let count = Signal::new(1);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     Computed::new(move || count.get().unwrap_or_default() * 2).unwrap()
//! };
//!
//! // Create an effect
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let _effect = {
//!     let (doubled, log) = (doubled.clone(), log.clone());
//!     Effect::new(move || log.lock().push(doubled.get().unwrap_or_default())).unwrap()
//! };
//!
//! // Update the signal; the effect runs before `set` returns
//! count.set(5).unwrap();
//! assert_eq!(*log.lock(), vec![2, 10]);
//! ```

pub mod error;
pub mod reactive;

pub use error::{ReactiveError, Result};
