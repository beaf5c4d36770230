//! Event Fan-out
//!
//! Every state change a session performs is announced as a [`SessionEvent`]
//! to an ordered list of listeners. Listeners see every event; filtering is
//! up to them. The session itself hooks the watcher registry in as one such
//! listener.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::trace;

use crate::sync::Key;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The initial snapshot has been loaded.
    Ready,
    /// Keys seen for the first time.
    NewKeys(Vec<Key>),
    /// Keys whose values changed. May be empty.
    DirtyState(Vec<Key>),
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::NewKeys(_) => "new-keys",
            Self::DirtyState(_) => "dirty-state",
        }
    }
}

/// Receiver of session events.
pub trait SessionListener: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

impl<F> SessionListener for F
where
    F: Fn(&SessionEvent) + Send + Sync,
{
    fn on_event(&self, event: &SessionEvent) {
        self(event)
    }
}

/// Handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Ordered list of listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<IndexMap<ListenerId, Arc<dyn SessionListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn SessionListener>) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.write().insert(id, listener);
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        self.listeners.write().shift_remove(&id).is_some()
    }

    /// Deliver `event` to every listener registered when emission starts.
    ///
    /// The listener list is not locked while listeners run, so they may
    /// register or unregister listeners themselves.
    pub fn emit(&self, event: &SessionEvent) {
        let listeners: Vec<Arc<dyn SessionListener>> =
            self.listeners.read().values().cloned().collect();
        trace!(kind = event.kind(), listeners = listeners.len(), "emitting event");
        for listener in listeners {
            listener.on_event(event);
        }
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn every_listener_sees_every_event_in_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let log = log.clone();
            bus.register(Arc::new(move |event: &SessionEvent| {
                log.lock().push(format!("{name}:{}", event.kind()));
            }));
        }

        bus.emit(&SessionEvent::Ready);
        bus.emit(&SessionEvent::DirtyState(vec![]));

        assert_eq!(
            *log.lock(),
            vec![
                "first:ready",
                "second:ready",
                "first:dirty-state",
                "second:dirty-state",
            ]
        );
    }

    #[test]
    fn unregistered_listener_stops_receiving() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let id = bus.register(Arc::new(move |_: &SessionEvent| *c.lock() += 1));

        bus.emit(&SessionEvent::Ready);
        assert!(bus.unregister(id));
        assert!(!bus.unregister(id));
        bus.emit(&SessionEvent::Ready);

        assert_eq!(*count.lock(), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn listener_may_unregister_itself_during_emit() {
        let bus = Arc::new(EventBus::new());
        let slot = Arc::new(Mutex::new(None::<ListenerId>));

        let b = bus.clone();
        let s = slot.clone();
        let id = bus.register(Arc::new(move |_: &SessionEvent| {
            if let Some(id) = s.lock().take() {
                b.unregister(id);
            }
        }));
        *slot.lock() = Some(id);

        bus.emit(&SessionEvent::NewKeys(vec!["a".into()]));
        assert!(bus.is_empty());
    }

    #[test]
    fn clear_drops_every_listener() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..3 {
            let c = count.clone();
            bus.register(Arc::new(move |_: &SessionEvent| *c.lock() += 1));
        }

        bus.clear();
        bus.emit(&SessionEvent::Ready);
        assert_eq!(*count.lock(), 0);
        assert!(bus.is_empty());
    }
}
