//! Syncstate Core
//!
//! This crate keeps a local key/value cache in step with a remote
//! authoritative store that is only reachable through an asynchronous
//! request/response channel. It implements:
//!
//! - Dependency-keyed watchers notified only when their keys change
//! - Dirty tracking with a per-key synchronization policy
//! - Batched, drained flushing of local writes to the remote store
//! - Reconciliation of remote pushes, including field-scoped merges
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `watch`: the watcher registry and its identities
//! - `sync`: state store, dirty tracker and reconciliation engine
//! - `event`: the typed event fan-out gluing the pieces together
//! - `transport`: traits for the remote channel and value decoration
//! - `session`: the facade owning all of the above
//!
//! # Example
//!
//! ```rust,ignore
//! use syncstate_core::{Session, SyncConfig, IdentityDecorator};
//! use serde_json::json;
//!
//! let session = Session::connect(transport, IdentityDecorator, SyncConfig::default())?;
//! session.load_state().await?;
//!
//! // Runs once now, then whenever "count" or "label" changes
//! let id = session.watch(["count", "label"], |values| {
//!     println!("count = {:?}, label = {:?}", values[0], values[1]);
//!     Ok(())
//! })?;
//!
//! // Watcher fires before this returns; the write is flushed in one batch
//! session.set("count", json!(5)).await?;
//!
//! session.unwatch(id);
//! session.dispose();
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod session;
pub mod sync;
pub mod transport;
pub mod watch;

pub use config::SyncConfig;
pub use error::{ConfigError, Result, SyncError};
pub use event::{EventBus, ListenerId, SessionEvent, SessionListener};
pub use session::{FlushKeys, Session, SessionStatus};
pub use sync::{Key, RemoteValue, StateMap};
pub use transport::{Decorator, Delta, FullState, IdentityDecorator, SubscriptionId, Transport};
pub use watch::{WatchError, WatcherId, WatcherRegistry};
