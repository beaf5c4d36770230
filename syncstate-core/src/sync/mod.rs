//! State, Dirt and Reconciliation
//!
//! This module holds the session's data and the two engines that mutate it
//! besides plain local writes.
//!
//! # Concepts
//!
//! ## State Store
//!
//! An insertion-ordered map from key to JSON value, plus a timestamp per key
//! and one revision counter. Local writes and reconciliation both advance
//! the same counter, so timestamps from either path are comparable.
//!
//! ## Dirty Tracker
//!
//! Keys written locally since the last flush. A key listed under the
//! client-only reserved key never becomes dirty, but still notifies local
//! watchers.
//!
//! ## Reconciliation
//!
//! Incoming remote snapshots are merged key by key. Values annotated with
//! the marker field are compared field by field so that a retransmitted,
//! unchanged container does not count as a change.

mod dirty;
mod reconcile;
mod remote;
mod store;

use indexmap::IndexMap;
use serde_json::Value;

pub use dirty::DirtyTracker;
pub use reconcile::{reconcile, Reconciliation};
pub use remote::RemoteValue;
pub use store::StateStore;

/// Name of one slot of shared state.
pub type Key = String;

/// Key/value state in insertion order.
pub type StateMap = IndexMap<Key, Value>;

/// Read a list of keys stored as a JSON array of strings under `key`.
///
/// Anything that is not an array yields an empty list; non-string entries
/// are skipped.
pub(crate) fn key_list<'a>(state: &'a StateMap, key: &str) -> impl Iterator<Item = &'a str> {
    state
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

/// Whether `needle` is listed under the reserved list key `list_key`.
pub(crate) fn is_listed(state: &StateMap, list_key: &str, needle: &str) -> bool {
    key_list(state, list_key).any(|listed| listed == needle)
}
