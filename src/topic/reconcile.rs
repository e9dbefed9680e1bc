use crate::desired::Topic;
use crate::result::TopicResult;
use crate::topic::admin::{ClusterAdmin, LiveConfigs, LiveTopic, ResourceType};
use crate::topic::plan::{build_partition_plan, BrokerId};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Desired configs whose live value differs. Keys absent from `desired` are
/// not managed; a key missing live differs from any desired value, including
/// an explicit empty one.
pub fn config_diff(
    live: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    desired
        .iter()
        .filter(|(key, value)| live.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// The topic's own overrides merged with the desired configs. Values the
/// topic inherits from the broker or the defaults are left out.
fn alter_payload(live: &LiveConfigs, desired: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut payload: BTreeMap<String, String> = live
        .iter()
        .filter(|(_, entry)| entry.is_topic_override())
        .filter_map(|(key, entry)| entry.value.as_ref().map(|v| (key.clone(), v.clone())))
        .collect();
    payload.extend(desired.iter().map(|(k, v)| (k.clone(), v.clone())));
    payload
}

/// Converges topics towards their desired definitions.
///
/// New topics are created with a random replica plan. Existing topics only
/// get config changes; partition and replication deltas are reported as
/// advisories. A failure is recorded on that topic's result and the
/// remaining topics are still processed.
pub struct TopicReconciler<'a> {
    admin: &'a dyn ClusterAdmin,
    dry_run: bool,
}

impl<'a> TopicReconciler<'a> {
    pub fn new(admin: &'a dyn ClusterAdmin, dry_run: bool) -> Self {
        Self { admin, dry_run }
    }

    /// Fails only when live topics cannot be listed.
    pub async fn reconcile(&self, desired: &BTreeMap<String, Topic>) -> Result<Vec<TopicResult>> {
        let live = self
            .admin
            .list_topics()
            .await
            .context("Failed to list live topics")?;

        let (existing, new): (Vec<&Topic>, Vec<&Topic>) =
            desired.values().partition(|t| live.contains_key(&t.name));
        info!(
            "Reconciling {} topics: {} new, {} existing",
            desired.len(),
            new.len(),
            existing.len()
        );

        let mut results = Vec::with_capacity(desired.len());

        if !new.is_empty() {
            match self.admin.broker_ids().await {
                Ok(brokers) => {
                    for topic in new {
                        results.push(self.create(topic, &brokers).await);
                    }
                }
                Err(e) => {
                    for topic in new {
                        let mut result = new_topic_result(topic);
                        result.errors.push(format!("{}: {e:#}", topic.name));
                        results.push(result);
                    }
                }
            }
        }

        for topic in existing {
            if let Some(live_topic) = live.get(&topic.name) {
                results.push(self.update(topic, live_topic).await);
            }
        }

        Ok(results)
    }

    async fn create(&self, topic: &Topic, brokers: &[BrokerId]) -> TopicResult {
        let mut result = new_topic_result(topic);

        let plan = build_partition_plan(
            topic.partitions,
            topic.replication_factor,
            brokers,
            None,
            &mut rand::rng(),
        );
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Cannot plan topic {}: {e}", topic.name);
                result.errors.push(format!("{}: {e}", topic.name));
                return result;
            }
        };
        debug!("Replica plan for {}: {:?}", topic.name, plan.partitions());

        let created = self
            .admin
            .create_topic(&topic.name, &plan, &result.new_configs, self.dry_run)
            .await;
        if let Err(e) = created {
            warn!("Failed to create topic {}: {e:#}", topic.name);
            result.errors.push(format!("{}: {e:#}", topic.name));
        }
        result.assignment = plan.into_inner();
        result
    }

    async fn update(&self, topic: &Topic, live: &LiveTopic) -> TopicResult {
        let mut result = TopicResult {
            name: topic.name.clone(),
            is_new: false,
            old_partitions: live.partitions,
            new_partitions: topic.partitions,
            old_replication_factor: live.replication_factor,
            new_replication_factor: topic.replication_factor,
            new_configs: topic.managed_configs(),
            ..Default::default()
        };

        if result.is_advisory() {
            warn!(
                "Topic {} has {} partitions with replication factor {}, desired {} and {}; not applied",
                topic.name,
                live.partitions,
                live.replication_factor,
                topic.partitions,
                topic.replication_factor
            );
        }

        if result.new_configs.is_empty() {
            return result;
        }

        let live_configs = match self.admin.topic_configs(&topic.name).await {
            Ok(configs) => configs,
            Err(e) => {
                result.errors.push(format!("{}: {e:#}", topic.name));
                return result;
            }
        };

        result.old_configs = result
            .new_configs
            .keys()
            .filter_map(|key| {
                let value = live_configs.get(key)?.value.clone()?;
                Some((key.clone(), value))
            })
            .collect();

        let diff = config_diff(&result.old_configs, &result.new_configs);
        if diff.is_empty() {
            debug!("Topic {} configs are up to date", topic.name);
            return result;
        }
        info!("Topic {} config changes: {:?}", topic.name, diff.keys());

        for (key, entry) in &live_configs {
            if entry.is_topic_override() && entry.value.is_none() && !result.new_configs.contains_key(key) {
                warn!("Topic {}: hidden override {key} is not managed and will be reset", topic.name);
            }
        }

        let payload = alter_payload(&live_configs, &result.new_configs);
        if let Err(e) = self
            .admin
            .alter_config(ResourceType::Topic, &topic.name, &payload, self.dry_run)
            .await
        {
            warn!("Failed to alter topic {}: {e:#}", topic.name);
            result.errors.push(format!("{}: {e:#}", topic.name));
        }
        result
    }
}

fn new_topic_result(topic: &Topic) -> TopicResult {
    TopicResult {
        name: topic.name.clone(),
        is_new: true,
        new_partitions: topic.partitions,
        new_replication_factor: topic.replication_factor,
        new_configs: topic.managed_configs(),
        ..Default::default()
    }
}
