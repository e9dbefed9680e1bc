//! Per-resource outcome records handed to report renderers.
//!
//! A result with errors describes a failed or partial change to that one
//! resource; sibling resources are processed regardless. Results form a set,
//! their order carries no meaning.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Characters a cluster uses to mask secret config values
const MASK_CHARS: [char; 2] = ['*', '\u{2022}'];

/// Whether `value` is a fully masked secret, e.g. `********`.
pub fn is_masked(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| MASK_CHARS.contains(&c))
}

/// Keys whose values are masked secrets.
///
/// Values that merely contain mask characters next to other text are not
/// flagged.
pub fn detect_sensitive_fields(config: &BTreeMap<String, String>) -> BTreeSet<String> {
    config
        .iter()
        .filter(|(_, value)| is_masked(value))
        .map(|(key, _)| key.clone())
        .collect()
}

/// One config key whose value differs between live and desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangedConfig {
    pub name: String,
    pub old_value: String,
    pub new_value: String,
    /// Either side is a masked secret; renderers should redact it
    pub sensitive: bool,
}

/// Outcome of reconciling one topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicResult {
    pub name: String,
    pub is_new: bool,
    pub old_partitions: i32,
    pub new_partitions: i32,
    pub old_replication_factor: i32,
    pub new_replication_factor: i32,
    /// Live values of the managed config keys
    pub old_configs: BTreeMap<String, String>,
    /// Desired values of the managed config keys
    pub new_configs: BTreeMap<String, String>,
    /// Replica assignment used to create the topic, preferred leader first
    pub assignment: Vec<Vec<i32>>,
    pub errors: Vec<String>,
}

impl TopicResult {
    pub fn partitions_changed(&self) -> bool {
        self.new_partitions != self.old_partitions
    }

    pub fn replication_factor_changed(&self) -> bool {
        self.new_replication_factor != self.old_replication_factor
    }

    pub fn configs_changed(&self) -> bool {
        !self.changed_configs().is_empty()
    }

    /// Pair old and new configs by key; a missing old value is shown as empty.
    pub fn changed_configs(&self) -> Vec<ChangedConfig> {
        let sensitive: BTreeSet<String> = detect_sensitive_fields(&self.old_configs)
            .into_iter()
            .chain(detect_sensitive_fields(&self.new_configs))
            .collect();

        self.new_configs
            .iter()
            .filter_map(|(name, new_value)| {
                let old = self.old_configs.get(name);
                let old_value = old.cloned().unwrap_or_default();
                (old != Some(new_value)).then(|| ChangedConfig {
                    name: name.clone(),
                    sensitive: sensitive.contains(name),
                    old_value,
                    new_value: new_value.clone(),
                })
            })
            .collect()
    }

    /// An existing topic whose partition count or replication factor differs
    /// from the desired one. Such deltas are reported, never applied.
    pub fn is_advisory(&self) -> bool {
        !self.is_new && (self.partitions_changed() || self.replication_factor_changed())
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Outcome of reconciling one schema subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaResult {
    pub topic: String,
    pub subject: String,
    /// Latest version before this run
    pub old_version: Option<i32>,
    /// Version the desired schema lives at after this run
    pub new_version: Option<i32>,
    pub schema_id: Option<i32>,
    pub old_compatibility: String,
    pub new_compatibility: String,
    pub must_register: bool,
    pub compatibility_changed: bool,
    pub errors: Vec<String>,
}

impl SchemaResult {
    pub fn new(topic: &str, subject: &str) -> Self {
        Self {
            topic: topic.to_string(),
            subject: subject.to_string(),
            ..Default::default()
        }
    }

    pub fn version_changed(&self) -> bool {
        self.new_version != self.old_version
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Counts over one run's results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub topics_created: usize,
    pub topics_updated: usize,
    pub topics_advisory: usize,
    pub schemas_registered: usize,
    pub compatibility_changed: usize,
    pub failed: usize,
}

impl ReconcileSummary {
    pub fn from_results(topics: &[TopicResult], schemas: &[SchemaResult]) -> Self {
        let mut summary = Self::default();
        for topic in topics {
            if topic.has_errors() {
                summary.failed += 1;
                continue;
            }
            if topic.is_new {
                summary.topics_created += 1;
            } else if topic.configs_changed() {
                summary.topics_updated += 1;
            }
            if topic.is_advisory() {
                summary.topics_advisory += 1;
            }
        }
        for schema in schemas {
            if schema.has_errors() {
                summary.failed += 1;
                continue;
            }
            summary.schemas_registered += usize::from(schema.must_register);
            summary.compatibility_changed += usize::from(schema.compatibility_changed);
        }
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
