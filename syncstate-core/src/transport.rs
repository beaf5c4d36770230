//! Collaborator Boundaries
//!
//! The session never talks to the network directly. It consumes a
//! [`Transport`] that can fetch a full snapshot, send a batch of updates,
//! stream remote pushes and report whether it is busy or connected, and a
//! [`Decorator`] that turns a state value into its transmittable form.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::BoxError;
use crate::sync::{Key, StateMap};

/// Handle for a remote push subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// One entry of a batched update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delta {
    pub key: Key,
    pub value: Value,
}

/// Result of a full snapshot fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullState {
    pub state: StateMap,
    pub name: Option<String>,
}

/// The remote channel.
///
/// `is_busy` and `is_connected` are consulted before every flush round and
/// must not block.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start receiving remote pushes (full or partial snapshots).
    ///
    /// Snapshots are processed one at a time in the order received.
    fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<StateMap>);

    /// Stop a push subscription.
    fn unsubscribe(&self, id: SubscriptionId);

    async fn fetch_full_state(&self) -> Result<FullState, BoxError>;

    /// Send one batch of updates. Not retried by the session.
    async fn send_batch(&self, deltas: Vec<Delta>) -> Result<(), BoxError>;

    fn is_busy(&self) -> bool;

    fn is_connected(&self) -> bool;
}

/// Maps a state value to the value actually transmitted.
///
/// Must not touch session state.
#[async_trait]
pub trait Decorator: Send + Sync {
    async fn decorate(&self, value: &Value) -> Result<Value, BoxError>;
}

/// Sends values unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityDecorator;

#[async_trait]
impl Decorator for IdentityDecorator {
    async fn decorate(&self, value: &Value) -> Result<Value, BoxError> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn identity_decorator_passes_through() {
        let value = json!({"nested": [1, 2, {"x": null}]});
        let decorated = IdentityDecorator.decorate(&value).await.unwrap();
        assert_eq!(decorated, value);
    }

    #[test]
    fn delta_serializes_as_pair() {
        let delta = Delta {
            key: "count".into(),
            value: json!(3),
        };
        assert_eq!(
            serde_json::to_value(&delta).unwrap(),
            json!({"key": "count", "value": 3})
        );
    }
}
