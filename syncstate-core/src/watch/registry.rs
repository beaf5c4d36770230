//! Watcher Registry
//!
//! The registry maps watcher ids to their dependency keys and callbacks.
//! It is the only place that decides which watchers run for a change.
//!
//! # How It Works
//!
//! 1. `watch` stores a record under a fresh id, in registration order.
//!
//! 2. `notify` snapshots the live records, keeps those whose dependency
//!    list intersects the changed keys, and calls each one with its values.
//!
//! 3. No lock is held while a callback runs, so callbacks may register or
//!    remove watchers on the same registry. Watchers added during a
//!    notification are not part of it; watchers removed during one may
//!    still run once if they were already in the snapshot.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use smallvec::SmallVec;
use tracing::{trace, warn};

use super::WatcherId;
use crate::sync::{Key, StateMap};

/// Error a watcher callback may return. Logged, never propagated.
pub type WatchError = Box<dyn StdError + Send + Sync + 'static>;

/// Callback invoked with one value per dependency key, in declared order.
pub type WatchCallback = dyn Fn(&[Option<Value>]) -> Result<(), WatchError> + Send + Sync;

struct WatcherRecord {
    id: WatcherId,
    keys: SmallVec<[Key; 4]>,
    callback: Box<WatchCallback>,
}

impl WatcherRecord {
    fn depends_on_any(&self, changed: &HashSet<&str>) -> bool {
        self.keys.iter().any(|key| changed.contains(key.as_str()))
    }

    /// Run the callback, containing errors and panics.
    fn invoke(&self, values: &[Option<Value>]) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(values))) {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(watcher = %self.id, keys = ?self.keys, error = %err, "watcher callback failed");
                false
            }
            Err(_) => {
                warn!(watcher = %self.id, keys = ?self.keys, "watcher callback panicked");
                false
            }
        }
    }
}

/// Registry of dependency-keyed watchers.
#[derive(Default)]
pub struct WatcherRegistry {
    watchers: RwLock<IndexMap<WatcherId, Arc<WatcherRecord>>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watcher for `keys`.
    ///
    /// Returns the id to pass to [`unwatch`](Self::unwatch).
    pub fn watch<I, K, F>(&self, keys: I, callback: F) -> WatcherId
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
        F: Fn(&[Option<Value>]) -> Result<(), WatchError> + Send + Sync + 'static,
    {
        let id = WatcherId::next();
        let record = WatcherRecord {
            id,
            keys: keys.into_iter().map(Into::into).collect(),
            callback: Box::new(callback),
        };
        trace!(watcher = %id, keys = ?record.keys, "watcher registered");
        self.watchers.write().insert(id, Arc::new(record));
        id
    }

    /// Remove a watcher. Returns `false` if it was already gone.
    pub fn unwatch(&self, id: WatcherId) -> bool {
        // shift_remove keeps the remaining watchers in registration order
        let removed = self.watchers.write().shift_remove(&id).is_some();
        if removed {
            trace!(watcher = %id, "watcher removed");
        }
        removed
    }

    /// Notify every watcher depending on any of `changed`, reading values
    /// from `state`. Returns the number of callbacks invoked.
    pub fn notify<K>(&self, changed: &[K], state: &StateMap) -> usize
    where
        K: AsRef<str>,
    {
        self.notify_with(changed, |key| state.get(key).cloned())
    }

    /// Like [`notify`](Self::notify), but values come from `lookup`.
    ///
    /// `lookup` is called right before each callback, once per dependency
    /// key, so every watcher sees the state as it is when it runs.
    pub fn notify_with<K, L>(&self, changed: &[K], mut lookup: L) -> usize
    where
        K: AsRef<str>,
        L: FnMut(&str) -> Option<Value>,
    {
        if changed.is_empty() {
            return 0;
        }
        let changed: HashSet<&str> = changed.iter().map(AsRef::as_ref).collect();

        let matched: Vec<Arc<WatcherRecord>> = self
            .watchers
            .read()
            .values()
            .filter(|record| record.depends_on_any(&changed))
            .cloned()
            .collect();

        let mut invoked = 0;
        let mut failed = 0;
        for record in matched {
            let values: Vec<Option<Value>> =
                record.keys.iter().map(|key| lookup(key)).collect();
            invoked += 1;
            if !record.invoke(&values) {
                failed += 1;
            }
        }

        trace!(invoked, failed, "watchers notified");
        invoked
    }

    /// Call one watcher with the given values regardless of what changed.
    ///
    /// Used to deliver the initial values right after registration.
    pub fn invoke_one<L>(&self, id: WatcherId, mut lookup: L) -> bool
    where
        L: FnMut(&str) -> Option<Value>,
    {
        let record = match self.watchers.read().get(&id) {
            Some(record) => Arc::clone(record),
            None => return false,
        };
        let values: Vec<Option<Value>> = record.keys.iter().map(|key| lookup(key)).collect();
        record.invoke(&values)
    }

    /// Currently registered watchers and their keys, in registration order.
    pub fn list_watchers(&self) -> Vec<(WatcherId, Vec<Key>)> {
        self.watchers
            .read()
            .values()
            .map(|record| (record.id, record.keys.to_vec()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.watchers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.read().is_empty()
    }

    pub fn clear(&self) {
        self.watchers.write().clear();
    }
}

impl std::fmt::Debug for WatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherRegistry")
            .field("watchers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn state(pairs: &[(&str, Value)]) -> StateMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn notifies_only_intersecting_watchers() {
        let registry = WatcherRegistry::new();
        let a_calls = Arc::new(AtomicI32::new(0));
        let b_calls = Arc::new(AtomicI32::new(0));

        let a = a_calls.clone();
        registry.watch(["a"], move |_| {
            a.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let b = b_calls.clone();
        registry.watch(["b", "c"], move |_| {
            b.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let st = state(&[("a", json!(1)), ("b", json!(2))]);
        assert_eq!(registry.notify(&["c"], &st), 1);
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);

        assert_eq!(registry.notify(&["a", "b"], &st), 2);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn passes_values_in_declared_order_with_absent_keys() {
        let registry = WatcherRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        registry.watch(["b", "missing", "a"], move |values| {
            sink.lock().push(values.to_vec());
            Ok(())
        });

        let st = state(&[("a", json!("x")), ("b", json!([1, 2]))]);
        registry.notify(&["a"], &st);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], vec![Some(json!([1, 2])), None, Some(json!("x"))]);
    }

    #[test]
    fn failing_watcher_does_not_stop_others() {
        let registry = WatcherRegistry::new();
        let calls = Arc::new(AtomicI32::new(0));

        registry.watch(["k"], |_| Err("boom".into()));
        registry.watch(["k"], |_| panic!("watcher exploded"));
        let c = calls.clone();
        registry.watch(["k"], move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let invoked = registry.notify(&["k"], &StateMap::new());
        assert_eq!(invoked, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unwatch_is_idempotent() {
        let registry = WatcherRegistry::new();
        let calls = Arc::new(AtomicI32::new(0));
        let c = calls.clone();
        let id = registry.watch(["k"], move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(registry.unwatch(id));
        assert!(!registry.unwatch(id));
        registry.notify(&["k"], &StateMap::new());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn list_watchers_keeps_registration_order() {
        let registry = WatcherRegistry::new();
        let first = registry.watch(["a"], |_| Ok(()));
        let second = registry.watch(["b", "c"], |_| Ok(()));
        let third = registry.watch(["d"], |_| Ok(()));
        registry.unwatch(second);

        let listed = registry.list_watchers();
        assert_eq!(
            listed,
            vec![(first, vec!["a".to_string()]), (third, vec!["d".to_string()])]
        );
    }

    #[test]
    fn callbacks_can_modify_registry_during_notify() {
        let registry = Arc::new(WatcherRegistry::new());
        let late_calls = Arc::new(AtomicI32::new(0));

        let reg = registry.clone();
        let late = late_calls.clone();
        let self_id = Arc::new(Mutex::new(None::<WatcherId>));
        let own = self_id.clone();
        let id = registry.watch(["k"], move |_| {
            // remove ourselves and add a new watcher mid-notification
            if let Some(id) = *own.lock() {
                reg.unwatch(id);
            }
            let late = late.clone();
            reg.watch(["k"], move |_| {
                late.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });
        *self_id.lock() = Some(id);

        assert_eq!(registry.notify(&["k"], &StateMap::new()), 1);
        // the watcher added during notify was not part of the snapshot
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 1);

        registry.notify(&["k"], &StateMap::new());
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_change_set_notifies_nobody() {
        let registry = WatcherRegistry::new();
        registry.watch(["k"], |_| panic!("must not run"));
        let none: [&str; 0] = [];
        assert_eq!(registry.notify(&none, &StateMap::new()), 0);
    }

    #[test]
    fn invoke_one_targets_single_watcher() {
        let registry = WatcherRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = registry.watch(["a"], move |values| {
            sink.lock().push(values.to_vec());
            Ok(())
        });
        registry.watch(["a"], |_| panic!("must not run"));

        assert!(registry.invoke_one(id, |_| Some(json!(7))));
        assert_eq!(*seen.lock(), vec![vec![Some(json!(7))]]);

        registry.unwatch(id);
        assert!(!registry.invoke_one(id, |_| None));
    }
}
