//! Record formats of the registry's compacted change-log topic.
//!
//! Keys:
//!
//! ```text
//! {"keytype":"SCHEMA","subject":"orders-value","version":1,"magic":1}
//! {"keytype":"CONFIG","subject":"orders-value","magic":0}
//! {"keytype":"NOOP","magic":0}
//! ```
//!
//! A SCHEMA value carries `subject`, `version`, `id`, `schema` and `deleted`;
//! a CONFIG value carries `compatibilityLevel`. A null value is a tombstone.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyType {
    Schema,
    Config,
    Noop,
    /// Key types this tool does not track (e.g. MODE, DELETE_SUBJECT)
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryKey {
    pub keytype: KeyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    #[serde(default)]
    pub magic: i32,
}

impl RegistryKey {
    pub fn schema(subject: &str, version: i32) -> Self {
        Self {
            keytype: KeyType::Schema,
            subject: Some(subject.to_string()),
            version: Some(version),
            magic: 1,
        }
    }

    /// CONFIG key; `None` addresses the global default.
    pub fn config(subject: Option<&str>) -> Self {
        Self {
            keytype: KeyType::Config,
            subject: subject.map(str::to_string),
            version: None,
            magic: 0,
        }
    }

    pub fn noop() -> Self {
        Self {
            keytype: KeyType::Noop,
            subject: None,
            version: None,
            magic: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaValue {
    pub subject: String,
    pub version: i32,
    pub id: i32,
    pub schema: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigValue {
    #[serde(default)]
    pub compatibility_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_key_wire_format() {
        let key = RegistryKey::schema("orders-value", 3);
        assert_eq!(
            serde_json::to_string(&key).unwrap(),
            r#"{"keytype":"SCHEMA","subject":"orders-value","version":3,"magic":1}"#
        );
    }

    #[test]
    fn test_noop_key_has_no_subject() {
        let key: RegistryKey = serde_json::from_str(r#"{"keytype":"NOOP","magic":0}"#).unwrap();
        assert_eq!(key, RegistryKey::noop());
    }

    #[test]
    fn test_unknown_key_type_is_tolerated() {
        let key: RegistryKey =
            serde_json::from_str(r#"{"keytype":"MODE","subject":"s","magic":0}"#).unwrap();
        assert_eq!(key.keytype, KeyType::Other);
    }

    #[test]
    fn test_schema_value_defaults_deleted() {
        let value: SchemaValue = serde_json::from_str(
            r#"{"subject":"S","version":1,"id":7,"schema":"\"string\""}"#,
        )
        .unwrap();
        assert!(!value.deleted);
        assert_eq!(value.id, 7);
        assert_eq!(value.schema, "\"string\"");
    }

    #[test]
    fn test_config_value_field_name() {
        let value: ConfigValue =
            serde_json::from_str(r#"{"compatibilityLevel":"FULL"}"#).unwrap();
        assert_eq!(value.compatibility_level.as_deref(), Some("FULL"));
    }
}
