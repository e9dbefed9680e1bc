//! Desired-state model: the topics (and their schemas) a run converges to.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

fn default_schema_type() -> String {
    "AVRO".to_string()
}

/// Errors in the desired state. They fail a run before any cluster call.
#[derive(Error, Debug)]
pub enum DesiredStateError {
    #[error("Topic '{0}' is defined more than once")]
    DuplicateTopic(String),

    #[error("Topic name must not be empty")]
    EmptyTopicName,

    #[error("Topic '{topic}' has invalid partition count {partitions}")]
    InvalidPartitions { topic: String, partitions: i32 },

    #[error("Topic '{topic}' has invalid replication factor {replication_factor}")]
    InvalidReplicationFactor {
        topic: String,
        replication_factor: i32,
    },

    #[error("Failed to parse desired state: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Failed to read desired state: {0}")]
    Io(#[from] std::io::Error),
}

/// A schema attached to a topic's key or value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSpec {
    /// Raw schema text; empty means the subject is not managed
    #[serde(default)]
    pub schema: String,
    /// Requested compatibility level; empty leaves it unmanaged
    #[serde(default)]
    pub compatibility: String,
    /// Opaque format tag passed to the registry (AVRO, PROTOBUF, JSON)
    #[serde(default = "default_schema_type")]
    pub schema_type: String,
}

/// A desired schema resolved to its registry subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    pub topic: String,
    pub subject: String,
    pub schema: String,
    pub compatibility: String,
    pub schema_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
    /// Config key -> value; a null value means the key is not managed
    #[serde(default)]
    pub configs: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub key_schema: Option<SchemaSpec>,
    #[serde(default)]
    pub value_schema: Option<SchemaSpec>,
}

impl Topic {
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
            configs: BTreeMap::new(),
            key_schema: None,
            value_schema: None,
        }
    }

    pub fn with_config(mut self, key: &str, value: &str) -> Self {
        self.configs.insert(key.to_string(), Some(value.to_string()));
        self
    }

    pub fn with_value_schema(mut self, schema: &str, compatibility: &str) -> Self {
        self.value_schema = Some(SchemaSpec {
            schema: schema.to_string(),
            compatibility: compatibility.to_string(),
            schema_type: default_schema_type(),
        });
        self
    }

    pub fn key_subject(&self) -> String {
        format!("{}-key", self.name)
    }

    pub fn value_subject(&self) -> String {
        format!("{}-value", self.name)
    }

    /// Configs this tool manages for the topic.
    pub fn managed_configs(&self) -> BTreeMap<String, String> {
        self.configs
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Managed key/value schemas, resolved to subjects.
    pub fn schemas(&self) -> Vec<Schema> {
        [
            (self.key_subject(), &self.key_schema),
            (self.value_subject(), &self.value_schema),
        ]
        .into_iter()
        .filter_map(|(subject, spec)| {
            let spec = spec.as_ref().filter(|s| !s.schema.is_empty())?;
            Some(Schema {
                topic: self.name.clone(),
                subject,
                schema: spec.schema.clone(),
                compatibility: spec.compatibility.clone(),
                schema_type: spec.schema_type.clone(),
            })
        })
        .collect()
    }

    fn validate(&self) -> Result<(), DesiredStateError> {
        if self.name.trim().is_empty() {
            return Err(DesiredStateError::EmptyTopicName);
        }
        if self.partitions <= 0 {
            return Err(DesiredStateError::InvalidPartitions {
                topic: self.name.clone(),
                partitions: self.partitions,
            });
        }
        if self.replication_factor <= 0 {
            return Err(DesiredStateError::InvalidReplicationFactor {
                topic: self.name.clone(),
                replication_factor: self.replication_factor,
            });
        }
        Ok(())
    }
}

/// The parsed desired-state document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(default)]
    pub topics: Vec<Topic>,
}

impl DesiredState {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, DesiredStateError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DesiredStateError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Validate every topic and key them by name.
    pub fn into_topic_map(self) -> Result<BTreeMap<String, Topic>, DesiredStateError> {
        let mut seen = BTreeSet::new();
        let mut topics = BTreeMap::new();
        for topic in self.topics {
            topic.validate()?;
            if !seen.insert(topic.name.clone()) {
                return Err(DesiredStateError::DuplicateTopic(topic.name));
            }
            topics.insert(topic.name.clone(), topic);
        }
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
topics:
  - name: orders
    partitions: 3
    replication_factor: 2
    configs:
      retention.ms: "604800000"
      cleanup.policy: null
    value_schema:
      schema: '{"type":"string"}'
      compatibility: FULL
  - name: payments
    partitions: 1
    replication_factor: 1
    key_schema:
      schema: ""
"#;

    #[test]
    fn test_parse_and_validate() {
        let topics = DesiredState::from_yaml_str(YAML)
            .unwrap()
            .into_topic_map()
            .unwrap();

        let orders = &topics["orders"];
        assert_eq!(orders.partitions, 3);
        assert_eq!(orders.configs.get("cleanup.policy"), Some(&None));
        assert_eq!(
            orders.managed_configs(),
            BTreeMap::from([("retention.ms".to_string(), "604800000".to_string())])
        );

        let schemas = orders.schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].subject, "orders-value");
        assert_eq!(schemas[0].schema_type, "AVRO");

        // An empty schema is unmanaged, not an error
        assert!(topics["payments"].schemas().is_empty());
    }

    #[test]
    fn test_duplicate_topic_is_rejected() {
        let state = DesiredState {
            topics: vec![Topic::new("a", 1, 1), Topic::new("a", 2, 1)],
        };
        assert!(matches!(
            state.into_topic_map(),
            Err(DesiredStateError::DuplicateTopic(name)) if name == "a"
        ));
    }

    #[test]
    fn test_invalid_counts_are_rejected() {
        let state = DesiredState {
            topics: vec![Topic::new("a", 0, 1)],
        };
        assert!(matches!(
            state.into_topic_map(),
            Err(DesiredStateError::InvalidPartitions { partitions: 0, .. })
        ));

        let state = DesiredState {
            topics: vec![Topic::new("b", 1, -1)],
        };
        assert!(matches!(
            state.into_topic_map(),
            Err(DesiredStateError::InvalidReplicationFactor { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topics.yaml");
        std::fs::write(&path, YAML).unwrap();

        let state = DesiredState::from_file(&path).unwrap();
        assert_eq!(state.topics.len(), 2);
    }
}
