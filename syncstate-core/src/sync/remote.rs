//! Incoming remote values.
//!
//! The remote side may annotate a container value with a marker field that
//! lists which sub-fields actually changed. Such values are compared field
//! by field against the local copy instead of as a whole.

use serde_json::Value;

use crate::config::SyncConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteValue {
    /// Compared and stored as a whole.
    Plain(Value),

    /// An object carrying a non-empty list of changed field names.
    PartialChange {
        value: Value,
        changed_fields: Vec<String>,
    },
}

impl RemoteValue {
    /// Classify a raw incoming value.
    ///
    /// Only an object whose marker field is a non-empty array of strings is
    /// a partial change. A marker that cannot be read that way falls back to
    /// [`RemoteValue::Plain`].
    pub fn classify(value: Value, config: &SyncConfig) -> Self {
        let changed_fields = value
            .as_object()
            .and_then(|object| object.get(&config.marker_field))
            .and_then(Value::as_array)
            .filter(|fields| !fields.is_empty())
            .and_then(|fields| {
                fields
                    .iter()
                    .map(|field| field.as_str().map(str::to_owned))
                    .collect::<Option<Vec<_>>>()
            });

        match changed_fields {
            Some(changed_fields) => Self::PartialChange {
                value,
                changed_fields,
            },
            None => Self::Plain(value),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Plain(value) | Self::PartialChange { value, .. } => value,
        }
    }

    /// Whether storing this value over `previous` counts as a modification.
    pub fn is_modified(&self, previous: Option<&Value>, config: &SyncConfig) -> bool {
        let Some(previous) = previous else {
            return true;
        };

        match self {
            Self::Plain(value) => value != previous,
            Self::PartialChange { value, .. } => {
                let (Some(incoming), Some(previous)) = (value.as_object(), previous.as_object())
                else {
                    return true;
                };
                incoming
                    .iter()
                    .filter(|(field, _)| !config.is_meta_field(field))
                    .any(|(field, value)| previous.get(field) != Some(value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> SyncConfig {
        SyncConfig::default()
    }

    #[test]
    fn classifies_marked_objects() {
        let value = RemoteValue::classify(json!({"a": 1, "_filter": ["a"]}), &config());
        assert_eq!(
            value,
            RemoteValue::PartialChange {
                value: json!({"a": 1, "_filter": ["a"]}),
                changed_fields: vec!["a".to_string()],
            }
        );
    }

    #[test]
    fn malformed_marker_falls_back_to_plain() {
        for raw in [
            json!({"a": 1, "_filter": "a"}),
            json!({"a": 1, "_filter": []}),
            json!({"a": 1, "_filter": ["a", 3]}),
            json!({"a": 1, "_filter": null}),
            json!([1, 2, 3]),
            json!("text"),
        ] {
            assert!(matches!(
                RemoteValue::classify(raw, &config()),
                RemoteValue::Plain(_)
            ));
        }
    }

    #[test]
    fn unchanged_partial_is_not_modified() {
        let previous = json!({"a": 1, "b": 2});
        let incoming = RemoteValue::classify(json!({"a": 1, "b": 2, "_filter": ["a"]}), &config());
        assert!(!incoming.is_modified(Some(&previous), &config()));
    }

    #[test]
    fn changed_partial_is_modified() {
        let previous = json!({"a": 1, "b": 2});
        let incoming = RemoteValue::classify(json!({"a": 5, "b": 2, "_filter": ["a"]}), &config());
        assert!(incoming.is_modified(Some(&previous), &config()));
    }

    #[test]
    fn partial_ignores_meta_fields_and_missing_fields() {
        let previous = json!({"a": 1, "b": 2, "_seen": 10});
        let incoming = RemoteValue::classify(json!({"a": 1, "_seen": 99, "_filter": ["a"]}), &config());
        assert!(!incoming.is_modified(Some(&previous), &config()));
    }

    #[test]
    fn partial_without_previous_is_modified() {
        let incoming = RemoteValue::classify(json!({"a": 1, "_filter": ["a"]}), &config());
        assert!(incoming.is_modified(None, &config()));
        assert!(incoming.is_modified(Some(&json!(3)), &config()));
    }

    #[test]
    fn plain_compares_whole_value() {
        let incoming = RemoteValue::classify(json!({"a": 1}), &config());
        assert!(!incoming.is_modified(Some(&json!({"a": 1})), &config()));
        assert!(incoming.is_modified(Some(&json!({"a": 1, "b": 2})), &config()));
        assert!(incoming.is_modified(None, &config()));
    }
}
