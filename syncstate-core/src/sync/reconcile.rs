//! Reconciliation Engine
//!
//! Merges a remote snapshot, full or partial, into the state store.
//!
//! # Algorithm
//!
//! 1. Advance the revision counter once for the whole call.
//! 2. For each incoming key, classify the value and decide whether it
//!    modifies the local copy.
//! 3. Write modified values stamped with the new revision; keys that had no
//!    timestamp before are reported as new.
//! 4. Keys listed under the no-dirty key are stored and stamped like any
//!    other but never reported.
//!
//! The caller turns the result into `NewKeys` / `DirtyState` events.

use tracing::{debug, trace};

use super::{is_listed, Key, RemoteValue, StateMap, StateStore};
use crate::config::SyncConfig;

/// Outcome of one reconciliation call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// The revision assigned to this call.
    pub revision: u64,
    /// Every reported key whose value was written, in incoming order.
    pub modified: Vec<Key>,
    /// The subset of `modified` seen for the first time.
    pub new_keys: Vec<Key>,
}

/// Merge `incoming` into `store`.
///
/// Zero keys is valid input: the revision still advances and the result
/// carries empty key lists.
pub fn reconcile(store: &mut StateStore, incoming: StateMap, config: &SyncConfig) -> Reconciliation {
    let revision = store.bump_revision();
    let mut result = Reconciliation {
        revision,
        ..Default::default()
    };

    for (key, raw) in incoming {
        let value = RemoteValue::classify(raw, config);
        if !value.is_modified(store.get(&key), config) {
            continue;
        }
        if let RemoteValue::PartialChange { changed_fields, .. } = &value {
            trace!(%key, ?changed_fields, "partial change");
        }
        let silent = is_listed(store.values(), &config.no_dirty_key, &key);
        let is_new = store.write(key.clone(), value.into_value(), revision);
        if silent {
            continue;
        }
        if is_new {
            result.new_keys.push(key.clone());
        }
        result.modified.push(key);
    }

    debug!(
        revision,
        modified = result.modified.len(),
        new = result.new_keys.len(),
        "reconciled snapshot"
    );
    result
}
