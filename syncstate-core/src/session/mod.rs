//! Session Facade
//!
//! A [`Session`] owns the state store, the dirty tracker, the watcher
//! registry and the event bus, and wires them to a transport.
//!
//! # Data Flow
//!
//! Local writes go `set`/`update` -> dirty tracker -> `DirtyState` event ->
//! watchers (synchronously, with the new values) -> flush loop -> one
//! batched remote call.
//!
//! Remote pushes go transport -> reconciliation -> `NewKeys`/`DirtyState`
//! events -> watchers with the merged values. Pushes are handled by one
//! background task, one snapshot at a time.
//!
//! # Locking
//!
//! All mutable state sits behind a single mutex that is never held across
//! an `.await` or while a watcher or listener runs, so callbacks may read
//! the session and register or remove watchers.

mod flush;
mod status;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

pub use flush::FlushKeys;
pub use status::SessionStatus;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::event::{EventBus, ListenerId, SessionEvent, SessionListener};
use crate::sync::{reconcile, DirtyTracker, Key, Reconciliation, StateMap, StateStore};
use crate::transport::{Decorator, SubscriptionId, Transport};
use crate::watch::{WatchError, WatcherId, WatcherRegistry};

struct Inner {
    store: StateStore,
    dirty: DirtyTracker,
    status: SessionStatus,
    name: Option<String>,
}

/// Resources released by `dispose`, newest first.
enum Subscription {
    Remote {
        id: SubscriptionId,
        pump: JoinHandle<()>,
    },
    Listener(ListenerId),
}

/// A synchronized view of remote state.
pub struct Session {
    transport: Arc<dyn Transport>,
    decorator: Arc<dyn Decorator>,
    config: SyncConfig,
    inner: Arc<Mutex<Inner>>,
    watchers: Arc<WatcherRegistry>,
    events: EventBus,
    draining: AtomicBool,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Session {
    /// Create a session, subscribe to remote pushes and hook watchers up to
    /// `DirtyState` events.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(
        transport: Arc<dyn Transport>,
        decorator: Arc<dyn Decorator>,
        config: SyncConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let runtime = Handle::try_current()?;

        let session = Arc::new(Self {
            inner: Arc::new(Mutex::new(Inner {
                store: StateStore::new(),
                dirty: DirtyTracker::new(config.client_only_key.clone()),
                status: SessionStatus::Uninitialized,
                name: None,
            })),
            transport,
            decorator,
            config,
            watchers: Arc::new(WatcherRegistry::new()),
            events: EventBus::new(),
            draining: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
        });

        let (id, mut pushes) = session.transport.subscribe();
        let weak = Arc::downgrade(&session);
        let pump = runtime.spawn(async move {
            while let Some(snapshot) = pushes.recv().await {
                let Some(session) = weak.upgrade() else {
                    break;
                };
                trace!(keys = snapshot.len(), "remote push received");
                session.apply_snapshot(snapshot);
            }
        });
        session
            .subscriptions
            .lock()
            .push(Subscription::Remote { id, pump });

        let inner = Arc::clone(&session.inner);
        let watchers = Arc::clone(&session.watchers);
        let listener = session.events.register(Arc::new(move |event: &SessionEvent| {
            if let SessionEvent::DirtyState(keys) = event {
                watchers.notify_with(keys.as_slice(), |key| inner.lock().store.get(key).cloned());
            }
        }));
        session
            .subscriptions
            .lock()
            .push(Subscription::Listener(listener));

        debug!(subscription = id.0, "session connected");
        Ok(session)
    }

    /// Fetch the full remote snapshot, reconcile it and emit `Ready`.
    ///
    /// Calling it again re-fetches and re-reconciles.
    pub async fn load_state(&self) -> Result<()> {
        let previous = self.transition(SessionStatus::Loading)?;

        let full = match self.transport.fetch_full_state().await {
            Ok(full) => full,
            Err(err) => {
                // a failed load leaves the session where it was
                if let Err(restore) = self.transition(previous) {
                    debug!(error = %restore, "status not restored after failed load");
                }
                return Err(SyncError::Transport(err));
            }
        };

        self.ensure_live()?;
        self.inner.lock().name = full.name;
        self.apply_snapshot(full.state);
        self.transition(SessionStatus::Ready)?;
        self.events.emit(&SessionEvent::Ready);
        debug!("session ready");
        Ok(())
    }

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().store.get(key).cloned()
    }

    /// Copy of the whole state.
    pub fn state(&self) -> StateMap {
        self.inner.lock().store.values().clone()
    }

    /// Write one value and flush.
    ///
    /// Writing a scalar equal to the current value does nothing. Arrays and
    /// objects always count as a change.
    pub async fn set(&self, key: impl Into<Key>, value: Value) -> Result<()> {
        self.update([(key.into(), value)]).await
    }

    /// Write several values under one revision and flush them together.
    pub async fn update<I, K>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<Key>,
    {
        self.ensure_live()?;
        let changed = self.write_local(entries);
        if changed.is_empty() {
            return Ok(());
        }
        self.flush(changed).await
    }

    /// Register a watcher and call it once right away with current values.
    pub fn watch<I, K, F>(&self, keys: I, callback: F) -> Result<WatcherId>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
        F: Fn(&[Option<Value>]) -> std::result::Result<(), WatchError> + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let id = self.watchers.watch(keys, callback);
        self.watchers
            .invoke_one(id, |key| self.inner.lock().store.get(key).cloned());
        Ok(id)
    }

    /// Remove a watcher. Repeated calls are no-ops returning `false`.
    pub fn unwatch(&self, id: WatcherId) -> bool {
        self.watchers.unwatch(id)
    }

    pub fn list_watchers(&self) -> Vec<(WatcherId, Vec<Key>)> {
        self.watchers.list_watchers()
    }

    /// Receive every session event.
    pub fn listen(&self, listener: Arc<dyn SessionListener>) -> Result<ListenerId> {
        self.ensure_live()?;
        Ok(self.events.register(listener))
    }

    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.events.unregister(id)
    }

    /// Mark keys dirty and emit `DirtyState` for all of them.
    ///
    /// Client-only keys stay out of the dirty set but still notify local
    /// watchers.
    pub fn mark_dirty<K>(&self, keys: &[K]) -> Result<()>
    where
        K: AsRef<str>,
    {
        self.ensure_live()?;
        {
            let mut inner = self.inner.lock();
            let Inner { store, dirty, .. } = &mut *inner;
            dirty.mark(keys, store.values());
        }
        let keys = keys.iter().map(|key| key.as_ref().to_owned()).collect();
        self.events.emit(&SessionEvent::DirtyState(keys));
        Ok(())
    }

    /// Whether `key` would be sent to the remote store.
    pub fn can_synchronize(&self, key: &str) -> bool {
        let inner = self.inner.lock();
        inner.dirty.can_synchronize(key, inner.store.values())
    }

    /// Reconcile a remote snapshot into local state and emit the resulting
    /// events.
    pub fn apply_snapshot(&self, incoming: StateMap) -> Reconciliation {
        let result = {
            let mut inner = self.inner.lock();
            reconcile(&mut inner.store, incoming, &self.config)
        };
        if !result.new_keys.is_empty() {
            self.events
                .emit(&SessionEvent::NewKeys(result.new_keys.clone()));
        }
        self.events
            .emit(&SessionEvent::DirtyState(result.modified.clone()));
        result
    }

    /// Release the internal listener and push subscription, newest first,
    /// then drop all watchers and listeners.
    ///
    /// Every later write, load, flush or watch fails with
    /// [`SyncError::Disposed`]. Calling it twice is harmless.
    pub fn dispose(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.status.is_disposed() {
                return;
            }
            inner.status = SessionStatus::Disposed;
        }

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions.into_iter().rev() {
            match subscription {
                Subscription::Listener(id) => {
                    self.events.unregister(id);
                }
                Subscription::Remote { id, pump } => {
                    pump.abort();
                    self.transport.unsubscribe(id);
                }
            }
        }
        self.watchers.clear();
        self.events.clear();
        debug!("session disposed");
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status
    }

    /// Name reported by the last full snapshot.
    pub fn name(&self) -> Option<String> {
        self.inner.lock().name.clone()
    }

    pub fn revision(&self) -> u64 {
        self.inner.lock().store.revision()
    }

    pub fn timestamp(&self, key: &str) -> Option<u64> {
        self.inner.lock().store.timestamp(key)
    }

    /// Keys waiting for the next flush, in mark order.
    pub fn dirty_keys(&self) -> Vec<Key> {
        self.inner.lock().dirty.keys()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.lock().status.is_disposed() {
            return Err(SyncError::Disposed);
        }
        Ok(())
    }

    /// Move to `next`, returning the previous status.
    fn transition(&self, next: SessionStatus) -> Result<SessionStatus> {
        let mut inner = self.inner.lock();
        let previous = inner.status;
        if previous.is_disposed() {
            return Err(SyncError::Disposed);
        }
        if previous != next && previous.can_transition_to(next) {
            trace!(from = %previous, to = %next, "session status changed");
            inner.status = next;
        }
        Ok(previous)
    }

    /// Store changed entries under one new revision and emit `NewKeys`.
    ///
    /// Returns the keys that actually changed.
    fn write_local<I, K>(&self, entries: I) -> Vec<Key>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<Key>,
    {
        let mut changed = Vec::new();
        let mut new_keys = Vec::new();
        {
            // a key written twice in one call keeps its last value
            let entries: IndexMap<Key, Value> = entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect();
            let mut inner = self.inner.lock();
            let entries: Vec<(Key, Value)> = entries
                .into_iter()
                .filter(|(key, value)| !is_unchanged_scalar(inner.store.get(key), value))
                .collect();
            if entries.is_empty() {
                return changed;
            }

            let revision = inner.store.bump_revision();
            for (key, value) in entries {
                if inner.store.write(key.clone(), value, revision) {
                    new_keys.push(key.clone());
                }
                changed.push(key);
            }
            trace!(revision, keys = ?changed, "local write");
        }

        if !new_keys.is_empty() {
            self.events.emit(&SessionEvent::NewKeys(new_keys));
        }
        changed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("status", &inner.status)
            .field("name", &inner.name)
            .field("revision", &inner.store.revision())
            .field("keys", &inner.store.values().len())
            .field("dirty", &inner.dirty.len())
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

/// Scalars compare by value; arrays and objects are always treated as new.
fn is_unchanged_scalar(previous: Option<&Value>, next: &Value) -> bool {
    match (previous, next) {
        (_, Value::Array(_) | Value::Object(_)) => false,
        (Some(previous), next) => previous == next,
        (None, _) => false,
    }
}
