//! Session configuration.
//!
//! The reserved names below are part of the data contract shared with the
//! remote side, so they are configurable rather than hard-coded. Every field
//! has a default; a config can be built in code or parsed from JSON.

use serde::Deserialize;

use crate::error::ConfigError;

/// Default state key holding the list of keys never sent to the remote.
pub const DEFAULT_CLIENT_ONLY_KEY: &str = "__client_only_keys";

/// Default state key holding the list of keys ignored by reconciliation.
pub const DEFAULT_NO_DIRTY_KEY: &str = "__no_dirty_keys";

/// Default marker field carrying the list of changed sub-fields.
pub const DEFAULT_MARKER_FIELD: &str = "_filter";

/// Default prefix for internal fields excluded from change comparison.
pub const DEFAULT_MARKER_PREFIX: char = '_';

/// Default cap on drain rounds per flush.
pub const DEFAULT_MAX_DRAIN_ROUNDS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// State key whose value lists keys that stay local.
    pub client_only_key: String,

    /// State key whose value lists keys reconciliation must skip.
    pub no_dirty_key: String,

    /// Field that turns an incoming object into a partial change.
    pub marker_field: String,

    /// Fields starting with this character are never compared.
    pub marker_prefix: char,

    /// Upper bound on batches sent by one flush call.
    pub max_drain_rounds: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_only_key: DEFAULT_CLIENT_ONLY_KEY.to_string(),
            no_dirty_key: DEFAULT_NO_DIRTY_KEY.to_string(),
            marker_field: DEFAULT_MARKER_FIELD.to_string(),
            marker_prefix: DEFAULT_MARKER_PREFIX,
            max_drain_rounds: DEFAULT_MAX_DRAIN_ROUNDS,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a config from JSON. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_only_key.is_empty() {
            return Err(ConfigError::Empty { field: "client_only_key" });
        }
        if self.no_dirty_key.is_empty() {
            return Err(ConfigError::Empty { field: "no_dirty_key" });
        }
        if self.marker_field.is_empty() {
            return Err(ConfigError::Empty { field: "marker_field" });
        }
        if self.max_drain_rounds == 0 {
            return Err(ConfigError::ZeroDrainRounds);
        }
        // The marker must itself be skipped by field comparison.
        if !self.marker_field.starts_with(self.marker_prefix) {
            return Err(ConfigError::MarkerOutsidePrefix {
                field: self.marker_field.clone(),
                prefix: self.marker_prefix,
            });
        }
        Ok(())
    }

    /// Whether `field` is internal metadata and excluded from comparison.
    pub fn is_meta_field(&self, field: &str) -> bool {
        field.starts_with(self.marker_prefix)
    }
}
