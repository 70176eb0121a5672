//! # Quiver
//!
//! Observable stores for single-threaded Rust.
//!
//! A store holds a value and delivers it to subscribers, once immediately
//! on subscription and again after every change. Quiver provides:
//!
//! ## Stores
//!
//! - `Writable<T>` - A store that can be `set` and `update`d
//! - `Readable<T>` - A store fed only by its start notifier or its sources
//! - Conditioned subscriptions that fire only when the value matches a target
//!
//! ## Derived stores
//!
//! - `derived` - A store computed from one or more stores
//! - `derived_async` - A store set through a callback, now or later
//!
//! A store runs its start notifier when it gains its first subscriber and
//! the returned cleanup when it loses its last one, so a derived store only
//! listens to its sources while someone listens to it.
//!
//! Notifications are delivered synchronously, before `set` returns, in the
//! order the changes happened, even when a subscriber sets another store.
//!
//! ```
//! use quiver::{derived, writable, Subscribable};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let celsius = writable(20.0);
//! let fahrenheit = derived(celsius.clone(), |c: &f64| c * 9.0 / 5.0 + 32.0);
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let sink = log.clone();
//! let _unsubscribe = fahrenheit.subscribe(move |f| sink.borrow_mut().push(*f));
//!
//! celsius.set(100.0);
//! assert_eq!(*log.borrow(), vec![68.0, 212.0]);
//! ```

pub mod error;
pub mod runtime;
pub mod store;
pub mod utils;

// Re-export main types for convenience
pub use error::{Result, StoreError};
pub use store::{
    derived, derived_async, derived_with, get, readable, try_get, writable, Aggregator, Readable,
    Setter, StoreOptions, Subscribable, Unsubscriber, Writable,
};
