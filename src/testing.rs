//! In-memory cluster and registry fakes.
//!
//! They implement the admin and registry seams with the semantics the
//! reconcilers rely on, so a full pass runs without a broker.

use crate::topic::{BrokerId, ClusterAdmin, LiveConfig, LiveConfigs, LiveTopic, PartitionPlan, ResourceType};
use async_trait::async_trait;
use rdkafka::admin::ConfigSource;
use schema_registry::{RegisteredSchema, RegistryReader, RegistryWriter};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct AdminState {
    brokers: Vec<BrokerId>,
    topics: BTreeMap<String, (LiveTopic, LiveConfigs)>,
    failing: BTreeSet<String>,
    create_calls: usize,
    alter_calls: usize,
    last_alter: Option<BTreeMap<String, String>>,
}

/// A cluster whose topics live in a map.
///
/// Altering configs replaces every topic-level override, like the
/// non-incremental admin call does. Inherited entries stay as they are.
#[derive(Default)]
pub struct MemoryAdmin {
    state: Mutex<AdminState>,
}

impl MemoryAdmin {
    pub fn new(brokers: Vec<BrokerId>) -> Self {
        Self {
            state: Mutex::new(AdminState {
                brokers,
                ..Default::default()
            }),
        }
    }

    pub fn add_topic(&self, name: &str, partitions: i32, replication_factor: i32, configs: &[(&str, &str)]) {
        let topic = LiveTopic {
            name: name.to_string(),
            partitions,
            replication_factor,
        };
        let configs = configs
            .iter()
            .map(|(k, v)| (k.to_string(), LiveConfig::overridden(v)))
            .collect();
        locked(&self.state)
            .topics
            .insert(name.to_string(), (topic, configs));
    }

    /// Describe `key` on `topic` as inherited from `source` rather than set
    /// on the topic.
    pub fn add_inherited_config(&self, topic: &str, key: &str, value: &str, source: ConfigSource) {
        if let Some((_, configs)) = locked(&self.state).topics.get_mut(topic) {
            configs.insert(key.to_string(), LiveConfig::from_source(value, source));
        }
    }

    /// Make every create and alter call for `topic` fail.
    pub fn fail_topic(&self, topic: &str) {
        locked(&self.state).failing.insert(topic.to_string());
    }

    pub fn topic(&self, name: &str) -> Option<LiveTopic> {
        locked(&self.state).topics.get(name).map(|(t, _)| t.clone())
    }

    pub fn configs(&self, name: &str) -> Option<LiveConfigs> {
        locked(&self.state).topics.get(name).map(|(_, c)| c.clone())
    }

    pub fn create_calls(&self) -> usize {
        locked(&self.state).create_calls
    }

    pub fn alter_calls(&self) -> usize {
        locked(&self.state).alter_calls
    }

    /// Payload of the most recent alter call.
    pub fn last_alter(&self) -> Option<BTreeMap<String, String>> {
        locked(&self.state).last_alter.clone()
    }
}

#[async_trait]
impl ClusterAdmin for MemoryAdmin {
    async fn broker_ids(&self) -> anyhow::Result<Vec<BrokerId>> {
        Ok(locked(&self.state).brokers.clone())
    }

    async fn list_topics(&self) -> anyhow::Result<BTreeMap<String, LiveTopic>> {
        Ok(locked(&self.state)
            .topics
            .iter()
            .map(|(name, (topic, _))| (name.clone(), topic.clone()))
            .collect())
    }

    async fn topic_configs(&self, topic: &str) -> anyhow::Result<LiveConfigs> {
        locked(&self.state)
            .topics
            .get(topic)
            .map(|(_, configs)| configs.clone())
            .ok_or_else(|| anyhow::anyhow!("Unknown topic {topic}"))
    }

    async fn create_topic(
        &self,
        name: &str,
        plan: &PartitionPlan,
        configs: &BTreeMap<String, String>,
        dry_run: bool,
    ) -> anyhow::Result<()> {
        let mut state = locked(&self.state);
        state.create_calls += 1;
        if state.failing.contains(name) {
            anyhow::bail!("Broker rejected topic {name}");
        }
        if state.topics.contains_key(name) {
            anyhow::bail!("Topic {name} already exists");
        }
        if dry_run {
            return Ok(());
        }

        let topic = LiveTopic {
            name: name.to_string(),
            partitions: plan.len() as i32,
            replication_factor: plan.partitions().first().map_or(0, |r| r.len() as i32),
        };
        let configs = configs
            .iter()
            .map(|(k, v)| (k.clone(), LiveConfig::overridden(v)))
            .collect();
        state.topics.insert(name.to_string(), (topic, configs));
        Ok(())
    }

    async fn alter_config(
        &self,
        resource: ResourceType,
        name: &str,
        configs: &BTreeMap<String, String>,
        dry_run: bool,
    ) -> anyhow::Result<()> {
        let mut state = locked(&self.state);
        state.alter_calls += 1;
        state.last_alter = Some(configs.clone());
        if resource != ResourceType::Topic {
            anyhow::bail!("Unsupported resource {resource}");
        }
        if state.failing.contains(name) {
            anyhow::bail!("Broker rejected configs of {name}");
        }
        let Some((_, live)) = state.topics.get_mut(name) else {
            anyhow::bail!("Unknown topic {name}");
        };
        if dry_run {
            return Ok(());
        }

        live.retain(|_, entry| !entry.is_topic_override());
        for (key, value) in configs {
            live.insert(key.clone(), LiveConfig::overridden(value));
        }
        Ok(())
    }
}

#[derive(Default)]
struct RegistryState {
    schemas: Vec<String>,
    // subject -> schema id per version, version = index + 1
    subjects: BTreeMap<String, Vec<i32>>,
    compatibility: BTreeMap<String, String>,
    global_compatibility: Option<String>,
    writes: usize,
}

impl RegistryState {
    fn schema_id(&mut self, schema: &str) -> i32 {
        let index = match self.schemas.iter().position(|s| s == schema) {
            Some(index) => index,
            None => {
                self.schemas.push(schema.to_string());
                self.schemas.len() - 1
            }
        };
        index as i32 + 1
    }

    fn append(&mut self, subject: &str, schema: &str) -> RegisteredSchema {
        let id = self.schema_id(schema);
        let versions = self.subjects.entry(subject.to_string()).or_default();
        if versions.last() == Some(&id) {
            return RegisteredSchema {
                id,
                version: versions.len() as i32,
            };
        }
        versions.push(id);
        RegisteredSchema {
            id,
            version: versions.len() as i32,
        }
    }
}

/// A schema registry held in memory. Counts every write it receives.
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a version without counting it as a write.
    pub fn seed(&self, subject: &str, schema: &str) -> RegisteredSchema {
        locked(&self.state).append(subject, schema)
    }

    pub fn set_global_compatibility(&self, level: &str) {
        locked(&self.state).global_compatibility = Some(level.to_string());
    }

    pub fn compatibility_of(&self, subject: &str) -> Option<String> {
        locked(&self.state).compatibility.get(subject).cloned()
    }

    pub fn writes(&self) -> usize {
        locked(&self.state).writes
    }
}

#[async_trait]
impl RegistryReader for MemoryRegistry {
    async fn lookup(
        &self,
        subject: &str,
        schema: &str,
        _schema_type: &str,
    ) -> schema_registry::Result<Option<RegisteredSchema>> {
        let state = locked(&self.state);
        let Some(id) = state.schemas.iter().position(|s| s == schema) else {
            return Ok(None);
        };
        let id = id as i32 + 1;
        Ok(state.subjects.get(subject).and_then(|versions| {
            versions
                .iter()
                .rposition(|v| *v == id)
                .map(|index| RegisteredSchema {
                    id,
                    version: index as i32 + 1,
                })
        }))
    }

    async fn versions(&self, subject: &str) -> schema_registry::Result<Vec<i32>> {
        Ok(locked(&self.state)
            .subjects
            .get(subject)
            .map(|versions| (1..=versions.len() as i32).collect())
            .unwrap_or_default())
    }

    async fn compatibility(&self, subject: &str) -> schema_registry::Result<Option<String>> {
        Ok(self.compatibility_of(subject))
    }

    async fn global_compatibility(&self) -> schema_registry::Result<Option<String>> {
        Ok(locked(&self.state).global_compatibility.clone())
    }
}

#[async_trait]
impl RegistryWriter for MemoryRegistry {
    async fn register(
        &self,
        subject: &str,
        schema: &str,
        _schema_type: &str,
    ) -> schema_registry::Result<RegisteredSchema> {
        let mut state = locked(&self.state);
        state.writes += 1;
        Ok(state.append(subject, schema))
    }

    async fn set_compatibility(&self, subject: &str, level: &str) -> schema_registry::Result<()> {
        let mut state = locked(&self.state);
        state.writes += 1;
        state
            .compatibility
            .insert(subject.to_string(), level.to_string());
        Ok(())
    }
}
