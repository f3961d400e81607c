//! reform Core Runtime
//!
//! This crate provides the foundational primitives the `reform` form engine
//! is built on:
//!
//! - **Reactive Signals**: observable cells with automatic dependency tracking
//! - **Reactions**: tracked expressions, one-shot watchers and batching
//! - **Change Notification**: a multicast listener registry
//!
//! # Example
//!
//! ```rust
//! use reform_core::reactive::{batch, observe, Signal};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let first = Signal::new(String::from("Ada"));
//! let last = Signal::new(String::from("Lovelace"));
//! let runs = Rc::new(Cell::new(0));
//!
//! let (f, l, counter) = (first.clone(), last.clone(), runs.clone());
//! let _watch = observe(
//!     move || {
//!         f.with(|_| ());
//!         l.with(|_| ());
//!     },
//!     move || counter.set(counter.get() + 1),
//! );
//!
//! batch(|| {
//!     first.set("Grace".into());
//!     last.set("Hopper".into());
//! });
//! assert_eq!(runs.get(), 1);
//! ```

pub mod events;
pub mod reactive;

pub use events::{ListenerId, Notifier};
pub use reactive::{
    batch, observe, reaction, reaction_immediate, stats, untracked, when, Reaction, ReactionId,
    ReactiveStats, Signal, SignalId, Tracked, Tracker,
};
