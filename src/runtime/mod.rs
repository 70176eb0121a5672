//! Runtime support for stores.
//!
//! This module provides the notification scheduler that batches and orders
//! change deliveries across every store sharing it.

mod scheduler;

pub use scheduler::{Lane, Scheduler};
pub(crate) use scheduler::{Invalidator, Job};
