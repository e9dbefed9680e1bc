//! One full reconciliation pass: topics first, then their schemas.

use crate::desired::Topic;
use crate::result::{ReconcileSummary, SchemaResult, TopicResult};
use crate::schema::SchemaReconciler;
use crate::topic::{ClusterAdmin, TopicReconciler};
use anyhow::Result;
use schema_registry::{RegistryReader, RegistryWriter};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Where schema reads and writes go.
#[derive(Clone, Copy)]
pub struct RegistryAccess<'a> {
    pub reader: &'a dyn RegistryReader,
    pub writer: &'a dyn RegistryWriter,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub topics: Vec<TopicResult>,
    pub schemas: Vec<SchemaResult>,
    pub summary: ReconcileSummary,
}

impl ReconcileReport {
    pub fn has_failures(&self) -> bool {
        self.summary.has_failures()
    }
}

/// Reconcile every desired topic, and its schemas when a registry is given.
///
/// Per-resource failures end up in the report; only a failure to read the
/// live topic list fails the pass.
pub async fn reconcile(
    desired: &BTreeMap<String, Topic>,
    admin: &dyn ClusterAdmin,
    registry: Option<RegistryAccess<'_>>,
    dry_run: bool,
) -> Result<ReconcileReport> {
    let topics = TopicReconciler::new(admin, dry_run)
        .reconcile(desired)
        .await?;

    let schemas = match registry {
        Some(registry) => {
            SchemaReconciler::new(registry.reader, registry.writer, dry_run)
                .reconcile(desired)
                .await
        }
        None => {
            let managed = desired.values().map(|t| t.schemas().len()).sum::<usize>();
            if managed > 0 {
                warn!("No schema registry configured, skipping {managed} schemas");
            }
            Vec::new()
        }
    };

    let summary = ReconcileSummary::from_results(&topics, &schemas);
    info!(
        "Reconciliation finished: {} created, {} updated, {} advisories, {} schemas registered, {} failed",
        summary.topics_created,
        summary.topics_updated,
        summary.topics_advisory,
        summary.schemas_registered,
        summary.failed
    );

    Ok(ReconcileReport {
        topics,
        schemas,
        summary,
    })
}
