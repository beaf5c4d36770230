//! Flush/Transmit Loop
//!
//! A flush drains the dirty set in rounds. Each round takes every dirty key,
//! decorates the current values concurrently and, when the transport is
//! connected, sends them as one batch. Writes landing while a round is in
//! flight refill the dirty set and are picked up by the next round.
//!
//! Only one drain loop runs per session. A flush that finds another one
//! running just marks its keys; the running loop sends them.

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::try_join_all;
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::Session;
use crate::error::{Result, SyncError};
use crate::sync::{Key, StateMap};
use crate::transport::Delta;

/// Extra keys to mark dirty before flushing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FlushKeys {
    #[default]
    None,
    One(Key),
    Many(Vec<Key>),
}

impl FlushKeys {
    pub fn into_keys(self) -> Vec<Key> {
        match self {
            Self::None => Vec::new(),
            Self::One(key) => vec![key],
            Self::Many(keys) => keys,
        }
    }
}

impl From<()> for FlushKeys {
    fn from(_: ()) -> Self {
        Self::None
    }
}

impl From<&str> for FlushKeys {
    fn from(key: &str) -> Self {
        Self::One(key.to_owned())
    }
}

impl From<Key> for FlushKeys {
    fn from(key: Key) -> Self {
        Self::One(key)
    }
}

impl From<Vec<Key>> for FlushKeys {
    fn from(keys: Vec<Key>) -> Self {
        Self::Many(keys)
    }
}

impl From<Vec<&str>> for FlushKeys {
    fn from(keys: Vec<&str>) -> Self {
        Self::Many(keys.into_iter().map(str::to_owned).collect())
    }
}

impl<const N: usize> From<[&str; N]> for FlushKeys {
    fn from(keys: [&str; N]) -> Self {
        Self::Many(keys.into_iter().map(str::to_owned).collect())
    }
}

/// Clears the draining flag when the loop exits, including on error.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Session {
    /// Mark `keys` dirty (optional) and send everything dirty.
    ///
    /// When the transport reports it is disconnected, the session also
    /// reconciles an empty snapshot so listeners still observe a
    /// `DirtyState` event. Watcher failures never surface here; transport
    /// and decoration failures do.
    pub async fn flush<K>(&self, keys: K) -> Result<()>
    where
        K: Into<FlushKeys>,
    {
        self.ensure_live()?;
        let keys = keys.into().into_keys();
        if !keys.is_empty() {
            self.mark_dirty(keys.as_slice())?;
        }

        let drained = self.drain().await;

        if !self.transport.is_connected() {
            trace!("transport disconnected, reconciling locally");
            self.apply_snapshot(StateMap::new());
        }
        drained
    }

    async fn drain(&self) -> Result<()> {
        if self.draining.swap(true, Ordering::AcqRel) {
            trace!("drain already running, leaving keys to it");
            return Ok(());
        }
        let guard = DrainGuard(&self.draining);

        for round in 1..=self.config.max_drain_rounds {
            if self.transport.is_busy() {
                debug!(round, "transport busy, deferring flush");
                return Ok(());
            }

            let batch: Vec<(Key, Value)> = {
                let mut inner = self.inner.lock();
                if inner.dirty.is_empty() {
                    // release under the lock so a concurrent mark either
                    // lands before this check or sees the flag cleared
                    drop(guard);
                    return Ok(());
                }
                let keys = inner.dirty.take();
                keys.into_iter()
                    .map(|key| {
                        let value = inner.store.get(&key).cloned().unwrap_or(Value::Null);
                        (key, value)
                    })
                    .collect()
            };

            let deltas = self.decorate_batch(batch).await?;

            if self.transport.is_connected() {
                let size = deltas.len();
                self.transport
                    .send_batch(deltas)
                    .await
                    .map_err(SyncError::Transport)?;
                debug!(round, size, "batch sent");
            } else {
                debug!(round, size = deltas.len(), "transport disconnected, batch dropped");
            }
        }

        let remaining = self.inner.lock().dirty.len();
        if remaining > 0 {
            warn!(
                remaining,
                rounds = self.config.max_drain_rounds,
                "drain round limit reached, leaving keys for the next flush"
            );
        }
        Ok(())
    }

    /// Decorate every value concurrently, keeping each key with its value.
    async fn decorate_batch(&self, batch: Vec<(Key, Value)>) -> Result<Vec<Delta>> {
        try_join_all(batch.into_iter().map(|(key, value)| async move {
            match self.decorator.decorate(&value).await {
                Ok(value) => Ok(Delta { key, value }),
                Err(source) => Err(SyncError::Decoration { key, source }),
            }
        }))
        .await
    }
}
