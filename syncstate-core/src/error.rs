//! Error types for the synchronization engine.
//!
//! Watcher callback failures never show up here: they are contained and
//! logged by the registry. Everything in [`SyncError`] surfaces to whoever
//! started the load, write or flush.

use std::error::Error as StdError;

/// Boxed error returned by the transport and decoration collaborators.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The remote call (fetch or batched update) failed.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// Decorating an outgoing value failed.
    #[error("failed to decorate value for key `{key}`: {source}")]
    Decoration {
        key: String,
        #[source]
        source: BoxError,
    },

    /// The session was disposed and can no longer be used.
    #[error("session has been disposed")]
    Disposed,

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Sessions spawn their push handler on the current Tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

impl SyncError {
    /// Wrap any error coming back from the transport.
    pub fn transport<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Transport(err.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("`{field}` must not be empty")]
    Empty { field: &'static str },

    #[error("`max_drain_rounds` must be at least 1")]
    ZeroDrainRounds,

    #[error("marker field `{field}` must start with the marker prefix `{prefix}`")]
    MarkerOutsidePrefix { field: String, prefix: char },
}
