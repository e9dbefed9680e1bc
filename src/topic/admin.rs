//! Cluster admin seam and its rdkafka implementation.

use crate::topic::plan::{BrokerId, PartitionPlan};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::admin::{
    AdminClient, AdminOptions, AlterConfig, ConfigSource, NewTopic, ResourceSpecifier,
    TopicReplication,
};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Shape of a topic as the cluster reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveTopic {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

/// One described config entry.
#[derive(Debug, PartialEq, Eq)]
pub struct LiveConfig {
    /// None when the broker hides the value (sensitive) or has none
    pub value: Option<String>,
    /// Where the value comes from; only `DynamicTopic` is a topic override
    pub source: ConfigSource,
    pub is_default: bool,
    pub is_sensitive: bool,
}

impl LiveConfig {
    /// A topic-level override.
    pub fn overridden(value: &str) -> Self {
        Self::from_source(value, ConfigSource::DynamicTopic)
    }

    pub fn from_source(value: &str, source: ConfigSource) -> Self {
        let is_default = source == ConfigSource::Default;
        Self {
            value: Some(value.to_string()),
            source,
            is_default,
            is_sensitive: false,
        }
    }

    pub fn is_topic_override(&self) -> bool {
        self.source == ConfigSource::DynamicTopic
    }
}

// `rdkafka::admin::ConfigSource` does not implement `Clone`, so `Clone`
// cannot be derived; this is the field-wise clone the derive would produce.
impl Clone for LiveConfig {
    fn clone(&self) -> Self {
        let source = match self.source {
            ConfigSource::Unknown => ConfigSource::Unknown,
            ConfigSource::DynamicTopic => ConfigSource::DynamicTopic,
            ConfigSource::DynamicBroker => ConfigSource::DynamicBroker,
            ConfigSource::DynamicDefaultBroker => ConfigSource::DynamicDefaultBroker,
            ConfigSource::StaticBroker => ConfigSource::StaticBroker,
            ConfigSource::Default => ConfigSource::Default,
        };
        Self {
            value: self.value.clone(),
            source,
            is_default: self.is_default,
            is_sensitive: self.is_sensitive,
        }
    }
}

pub type LiveConfigs = BTreeMap<String, LiveConfig>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Topic,
    Broker,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Topic => write!(f, "topic"),
            ResourceType::Broker => write!(f, "broker"),
        }
    }
}

/// The admin calls reconciliation needs. Every call may fail on the network.
///
/// `dry_run` asks the cluster to validate the request without applying it.
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    async fn broker_ids(&self) -> Result<Vec<BrokerId>>;

    async fn list_topics(&self) -> Result<BTreeMap<String, LiveTopic>>;

    async fn topic_configs(&self, topic: &str) -> Result<LiveConfigs>;

    async fn create_topic(
        &self,
        name: &str,
        plan: &PartitionPlan,
        configs: &BTreeMap<String, String>,
        dry_run: bool,
    ) -> Result<()>;

    /// Replace the dynamic configs of a resource with `configs`.
    ///
    /// The call is not incremental: overrides missing from `configs` revert to
    /// their defaults.
    async fn alter_config(
        &self,
        resource: ResourceType,
        name: &str,
        configs: &BTreeMap<String, String>,
        dry_run: bool,
    ) -> Result<()>;
}

struct ClusterMetadata {
    brokers: Vec<BrokerId>,
    topics: BTreeMap<String, LiveTopic>,
}

/// rdkafka `AdminClient` wrapper.
#[derive(Clone)]
pub struct KafkaAdmin {
    client: Arc<AdminClient<DefaultClientContext>>,
    timeout: Duration,
}

impl KafkaAdmin {
    pub fn new(
        brokers: &str,
        properties: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", brokers);
        for (key, value) in properties {
            config.set(key, value);
        }
        let client: AdminClient<DefaultClientContext> =
            config.create().context("Failed to create admin client")?;

        Ok(Self {
            client: Arc::new(client),
            timeout,
        })
    }

    fn options(&self, dry_run: bool) -> AdminOptions {
        AdminOptions::new()
            .operation_timeout(Some(self.timeout))
            .request_timeout(Some(self.timeout))
            .validate_only(dry_run)
    }

    async fn metadata(&self) -> Result<ClusterMetadata> {
        let client = self.client.clone();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || -> Result<ClusterMetadata> {
            let metadata = client
                .inner()
                .fetch_metadata(None, timeout)
                .context("Failed to fetch cluster metadata")?;

            let brokers = metadata.brokers().iter().map(|b| b.id()).collect();
            let topics = metadata
                .topics()
                .iter()
                .filter(|t| t.error().is_none())
                .map(|t| {
                    let replication_factor = t
                        .partitions()
                        .first()
                        .map(|p| p.replicas().len() as i32)
                        .unwrap_or(0);
                    let topic = LiveTopic {
                        name: t.name().to_string(),
                        partitions: t.partitions().len() as i32,
                        replication_factor,
                    };
                    (topic.name.clone(), topic)
                })
                .collect();

            Ok(ClusterMetadata { brokers, topics })
        })
        .await
        .context("Metadata task failed")?
    }
}

#[async_trait]
impl ClusterAdmin for KafkaAdmin {
    async fn broker_ids(&self) -> Result<Vec<BrokerId>> {
        Ok(self.metadata().await?.brokers)
    }

    async fn list_topics(&self) -> Result<BTreeMap<String, LiveTopic>> {
        Ok(self.metadata().await?.topics)
    }

    async fn topic_configs(&self, topic: &str) -> Result<LiveConfigs> {
        let results = self
            .client
            .describe_configs(&[ResourceSpecifier::Topic(topic)], &self.options(false))
            .await
            .with_context(|| format!("Failed to describe configs of {topic}"))?;

        let mut configs = LiveConfigs::new();
        for result in results {
            let resource = result
                .map_err(|code| anyhow::anyhow!("Failed to describe configs of {topic}: {code}"))?;
            for entry in resource.entries {
                configs.insert(
                    entry.name,
                    LiveConfig {
                        value: entry.value,
                        source: entry.source,
                        is_default: entry.is_default,
                        is_sensitive: entry.is_sensitive,
                    },
                );
            }
        }
        debug!("Described {} configs of {topic}", configs.len());
        Ok(configs)
    }

    async fn create_topic(
        &self,
        name: &str,
        plan: &PartitionPlan,
        configs: &BTreeMap<String, String>,
        dry_run: bool,
    ) -> Result<()> {
        let assignment: Vec<&[BrokerId]> = plan.partitions().iter().map(Vec::as_slice).collect();
        let mut new_topic = NewTopic::new(
            name,
            plan.len() as i32,
            TopicReplication::Variable(&assignment),
        );
        for (key, value) in configs {
            new_topic = new_topic.set(key, value);
        }

        let results = self
            .client
            .create_topics(&[new_topic], &self.options(dry_run))
            .await
            .with_context(|| format!("Failed to create topic {name}"))?;

        for result in results {
            result.map_err(|(topic, code)| anyhow::anyhow!("Failed to create topic {topic}: {code}"))?;
        }
        info!("Created topic {name} with {} partitions (dry run: {dry_run})", plan.len());
        Ok(())
    }

    async fn alter_config(
        &self,
        resource: ResourceType,
        name: &str,
        configs: &BTreeMap<String, String>,
        dry_run: bool,
    ) -> Result<()> {
        let specifier = match resource {
            ResourceType::Topic => ResourceSpecifier::Topic(name),
            ResourceType::Broker => ResourceSpecifier::Broker(
                name.parse()
                    .with_context(|| format!("Invalid broker id: {name}"))?,
            ),
        };
        let mut alter = AlterConfig::new(specifier);
        for (key, value) in configs {
            alter = alter.set(key, value);
        }

        let results = self
            .client
            .alter_configs(&[alter], &self.options(dry_run))
            .await
            .with_context(|| format!("Failed to alter configs of {resource} {name}"))?;

        for result in results {
            result.map_err(|(_, code)| {
                anyhow::anyhow!("Failed to alter configs of {resource} {name}: {code}")
            })?;
        }
        info!("Altered {} configs of {resource} {name} (dry run: {dry_run})", configs.len());
        Ok(())
    }
}
