//! Observable stores.
//!
//! Stores hold a value, deliver it to subscribers on every change and run
//! their start notifier only while someone is subscribed. Derived stores
//! combine other stores through an aggregation function.

mod derived;
mod options;
mod snapshot;
mod store;

pub use derived::{
    attach_slot, derived, derived_async, derived_with, Aggregator, SourceLink, Sources,
};
pub use options::{ChangeDetection, Predicate, StoreOptions};
pub use snapshot::{get, try_get};
pub use store::{
    readable, writable, Readable, Setter, StartNotifier, Subscribable, Unsubscriber, Writable,
};
