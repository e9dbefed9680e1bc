//! Topic reconciliation: replica placement, config diffs and the admin seam.

pub mod admin;
pub mod plan;
pub mod reconcile;

pub use admin::{ClusterAdmin, KafkaAdmin, LiveConfig, LiveConfigs, LiveTopic, ResourceType};
pub use plan::{build_partition_plan, draw_distinct_brokers, BrokerId, PartitionPlan, PlanError};
pub use reconcile::{config_diff, TopicReconciler};
