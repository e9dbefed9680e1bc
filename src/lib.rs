//! kafka-reconcile
//!
//! Converges Kafka topics and their schema registry subjects towards a
//! declarative desired state.
//!
//! # Features
//!
//! - Topic creation with random, distinct-broker replica placement
//! - Config drift detection and correction for existing topics
//! - Partition and replication deltas reported as advisories, never applied
//! - Schema registration and per-subject compatibility management
//! - Registry reads from REST or from a cache rebuilt off the `_schemas` topic
//! - Dry runs backed by the admin API's validate-only mode
//!
//! # CLI Usage
//!
//! ```bash
//! # Apply a desired-state file
//! kafka-reconcile reconcile --file topics.yaml --registry-url http://localhost:8081
//!
//! # Validate only, reading registry state from its change-log topic
//! kafka-reconcile reconcile --file topics.yaml --dry-run --use-cache
//!
//! # Print the first 10 records of a topic
//! kafka-reconcile view --topic orders --max-records 10
//!
//! # Copy a topic
//! kafka-reconcile replicate --from orders --to orders-copy
//! ```

pub mod config;
pub mod desired;
pub mod reconcile;
pub mod result;
pub mod schema;
pub mod testing;
pub mod topic;

pub use config::ClusterOpts;
pub use desired::{DesiredState, DesiredStateError, Schema, SchemaSpec, Topic};
pub use reconcile::{reconcile, ReconcileReport, RegistryAccess};
pub use result::{
    detect_sensitive_fields, ChangedConfig, ReconcileSummary, SchemaResult, TopicResult,
};
pub use schema::SchemaReconciler;
pub use topic::{ClusterAdmin, KafkaAdmin, TopicReconciler};
