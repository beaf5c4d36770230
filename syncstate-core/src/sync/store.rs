//! The session's state store.

use std::collections::HashMap;

use serde_json::Value;

use super::{Key, StateMap};

/// Values, per-key timestamps and the shared revision counter.
///
/// Invariants: every key ever written through [`write`](Self::write) has a
/// timestamp, and timestamps only grow because they are always taken from
/// the counter right after it advances.
#[derive(Debug, Default, Clone)]
pub struct StateStore {
    values: StateMap,
    timestamps: HashMap<Key, u64>,
    revision: u64,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn values(&self) -> &StateMap {
        &self.values
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn timestamp(&self, key: &str) -> Option<u64> {
        self.timestamps.get(key).copied()
    }

    /// Advance the revision counter and return the new revision.
    pub fn bump_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Store `value` under `key` stamped with `revision`.
    ///
    /// Returns `true` if the key had never been stamped before.
    pub fn write(&mut self, key: Key, value: Value, revision: u64) -> bool {
        let previous = self.timestamps.insert(key.clone(), revision);
        if let Some(previous) = previous {
            debug_assert!(revision >= previous, "timestamps must not go backwards");
        }
        self.values.insert(key, value);
        previous.is_none()
    }
}
