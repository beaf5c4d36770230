//! Dirty Tracker
//!
//! Keys written locally and not yet handed to a flush. The client-only list
//! is read from the state on every mark since it can change at runtime.

use indexmap::IndexSet;
use tracing::trace;

use super::{is_listed, Key, StateMap};

#[derive(Debug, Default)]
pub struct DirtyTracker {
    client_only_key: Key,
    dirty: IndexSet<Key>,
}

impl DirtyTracker {
    /// `client_only_key` names the state slot listing keys that stay local.
    pub fn new(client_only_key: impl Into<Key>) -> Self {
        Self {
            client_only_key: client_only_key.into(),
            dirty: IndexSet::new(),
        }
    }

    /// Whether `key` may be sent to the remote store.
    pub fn can_synchronize(&self, key: &str, state: &StateMap) -> bool {
        !is_listed(state, &self.client_only_key, key)
    }

    /// Mark `keys` dirty, skipping client-only ones.
    ///
    /// Returns how many keys were accepted.
    pub fn mark<K>(&mut self, keys: &[K], state: &StateMap) -> usize
    where
        K: AsRef<str>,
    {
        let mut accepted = 0;
        for key in keys {
            let key = key.as_ref();
            if self.can_synchronize(key, state) {
                self.dirty.insert(key.to_owned());
                accepted += 1;
            } else {
                trace!(key, "client-only key kept out of dirty set");
            }
        }
        accepted
    }

    /// Drain the dirty set, in the order keys were first marked.
    pub fn take(&mut self) -> Vec<Key> {
        self.dirty.drain(..).collect()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.dirty.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dirty.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_with_client_only(keys: serde_json::Value) -> StateMap {
        let mut state = StateMap::new();
        state.insert("__local".into(), keys);
        state
    }

    #[test]
    fn marks_and_drains_in_order() {
        let mut tracker = DirtyTracker::new("__local");
        let state = StateMap::new();

        assert_eq!(tracker.mark(&["b", "a", "b"], &state), 3);
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.take(), vec!["b".to_string(), "a".to_string()]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn client_only_keys_never_become_dirty() {
        let mut tracker = DirtyTracker::new("__local");
        let state = state_with_client_only(json!(["secret"]));

        assert_eq!(tracker.mark(&["secret", "public"], &state), 1);
        assert_eq!(tracker.keys(), vec!["public".to_string()]);
    }

    #[test]
    fn exclusion_list_is_read_on_every_mark() {
        let mut tracker = DirtyTracker::new("__local");
        let mut state = state_with_client_only(json!(["draft"]));
        assert!(!tracker.can_synchronize("draft", &state));

        state.insert("__local".into(), json!([]));
        assert!(tracker.can_synchronize("draft", &state));
        assert_eq!(tracker.mark(&["draft"], &state), 1);
    }

    #[test]
    fn malformed_exclusion_list_excludes_nothing() {
        let tracker = DirtyTracker::new("__local");
        let state = state_with_client_only(json!("draft"));
        assert!(tracker.can_synchronize("draft", &state));
    }
}
