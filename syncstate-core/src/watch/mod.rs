//! Dependency-Keyed Watchers
//!
//! A watcher is a callback subscribed to a fixed, ordered list of state keys.
//! Whenever any of those keys changes, the callback runs with the current
//! value of every key it declared, in declared order.
//!
//! # Concepts
//!
//! ## Identity
//!
//! Each watcher gets a [`WatcherId`] when registered. Ids come from a global
//! counter and are never reused, so an id held after removal can never
//! unregister somebody else's watcher.
//!
//! ## Notification
//!
//! The registry does not know where values live. Callers hand it the set of
//! changed keys plus a lookup, and the registry calls exactly the watchers
//! whose dependency list intersects the changed set. Keys missing from the
//! state reach the callback as `None`.
//!
//! ## Failure Containment
//!
//! A watcher that returns an error or panics is logged and skipped. The
//! remaining watchers still run and the caller of `notify` never sees the
//! failure.

mod id;
mod registry;

pub use id::WatcherId;
pub use registry::{WatchCallback, WatchError, WatcherRegistry};
