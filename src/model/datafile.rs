//! The datafile, its cache envelope and feature-variable descriptors.

use serde::{Deserialize, Serialize};

/// Serialized experiment and feature definitions.
///
/// The client treats the document as opaque; the engine interprets it. Once
/// loaded a datafile is never modified, only replaced by a newer one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Datafile(serde_json::Value);

impl Datafile {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn from_json_str(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body).map(Self)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// The `revision` field, when present.
    pub fn revision(&self) -> Option<&str> {
        self.0.get("revision").and_then(|r| r.as_str())
    }

    /// Variables declared by `feature_key`, or `None` if the feature is unknown.
    ///
    /// Variables whose type the client cannot query are left out.
    pub fn feature_variables(&self, feature_key: &str) -> Option<Vec<VariableSpec>> {
        let feature = self
            .0
            .get("featureFlags")?
            .as_array()?
            .iter()
            .find(|f| f.get("key").and_then(|k| k.as_str()) == Some(feature_key))?;

        let specs = feature
            .get("variables")
            .and_then(|v| v.as_array())
            .map(|vars| {
                vars.iter()
                    .filter_map(|v| serde_json::from_value::<VariableSpec>(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Some(specs)
    }
}

/// Datafile as persisted in the durable cache.
///
/// Serialized as `{ "datafile": ..., "metadata": { "timestampCached": <epoch ms> } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub datafile: Datafile,
    pub metadata: CacheMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub timestamp_cached: i64,
}

impl CacheEntry {
    pub fn new(datafile: Datafile, now_ms: i64) -> Self {
        Self {
            datafile,
            metadata: CacheMetadata {
                timestamp_cached: now_ms,
            },
        }
    }

    /// An entry is fresh until it is more than `max_age_ms` old.
    pub fn is_fresh(&self, now_ms: i64, max_age_ms: u64) -> bool {
        let age = now_ms.saturating_sub(self.metadata.timestamp_cached);
        age <= i64::try_from(max_age_ms).unwrap_or(i64::MAX)
    }
}

/// Type of a feature variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Boolean,
    Integer,
    Double,
}

/// A variable to read as part of a variable bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: VariableType,
}

impl VariableSpec {
    pub fn new(key: impl Into<String>, kind: VariableType) -> Self {
        Self {
            key: key.into(),
            kind,
        }
    }
}

/// A typed feature variable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Datafile {
        Datafile::new(json!({
            "revision": "42",
            "featureFlags": [
                {
                    "key": "checkout",
                    "variables": [
                        {"id": "1", "key": "label", "type": "string", "defaultValue": "Buy"},
                        {"id": "2", "key": "enabled", "type": "boolean", "defaultValue": "true"},
                        {"id": "3", "key": "blob", "type": "json", "defaultValue": "{}"}
                    ]
                },
                {"key": "bare"}
            ]
        }))
    }

    #[test]
    fn test_revision() {
        assert_eq!(sample().revision(), Some("42"));
        assert_eq!(Datafile::new(json!({})).revision(), None);
    }

    #[test]
    fn test_feature_variables_skips_unsupported_types() {
        let specs = sample().feature_variables("checkout").unwrap();
        assert_eq!(
            specs,
            vec![
                VariableSpec::new("label", VariableType::String),
                VariableSpec::new("enabled", VariableType::Boolean),
            ]
        );
        assert_eq!(sample().feature_variables("bare"), Some(vec![]));
        assert_eq!(sample().feature_variables("missing"), None);
    }

    #[test]
    fn test_cache_entry_wire_format() {
        let entry = CacheEntry::new(Datafile::new(json!({"revision": "1"})), 1_700_000_000_000);
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({
                "datafile": {"revision": "1"},
                "metadata": {"timestampCached": 1_700_000_000_000i64}
            })
        );
    }

    #[test]
    fn test_cache_entry_freshness() {
        let entry = CacheEntry::new(Datafile::new(json!({})), 1_000);
        assert!(entry.is_fresh(1_000, 500));
        assert!(entry.is_fresh(1_500, 500));
        assert!(!entry.is_fresh(1_501, 500));
    }

    #[test]
    fn test_variable_value_is_untagged() {
        assert_eq!(serde_json::to_value(VariableValue::Boolean(true)).unwrap(), json!(true));
        assert_eq!(
            serde_json::from_value::<VariableValue>(json!("hi")).unwrap(),
            VariableValue::String("hi".into())
        );
    }
}
