//! Schema subject reconciliation against a registry.

use crate::desired::{Schema, Topic};
use crate::result::SchemaResult;
use schema_registry::{RegistryReader, RegistryWriter};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

fn same_level(current: Option<&str>, desired: &str) -> bool {
    current.is_some_and(|level| level.eq_ignore_ascii_case(desired))
}

/// Registers schemas and sets compatibility levels where they drift.
///
/// Reads go through `reader`, either the REST client or a bootstrapped
/// change-log cache. Writes always go through `writer`, and are skipped
/// entirely in dry-run mode.
pub struct SchemaReconciler<'a> {
    reader: &'a dyn RegistryReader,
    writer: &'a dyn RegistryWriter,
    dry_run: bool,
}

impl<'a> SchemaReconciler<'a> {
    pub fn new(reader: &'a dyn RegistryReader, writer: &'a dyn RegistryWriter, dry_run: bool) -> Self {
        Self {
            reader,
            writer,
            dry_run,
        }
    }

    /// Reconcile the key and value schemas of every topic that manages one.
    pub async fn reconcile(&self, topics: &BTreeMap<String, Topic>) -> Vec<SchemaResult> {
        let mut results = Vec::new();
        for topic in topics.values() {
            for schema in topic.schemas() {
                results.push(self.reconcile_schema(&schema).await);
            }
        }
        info!("Reconciled {} schema subjects", results.len());
        results
    }

    pub async fn reconcile_schema(&self, desired: &Schema) -> SchemaResult {
        let mut result = SchemaResult::new(&desired.topic, &desired.subject);

        if let Err(e) = self.reconcile_version(desired, &mut result).await {
            warn!("Failed to reconcile schema of {}: {e}", desired.subject);
            result.errors.push(format!("{}: {e}", desired.subject));
        }
        if let Err(e) = self.reconcile_compatibility(desired, &mut result).await {
            warn!("Failed to reconcile compatibility of {}: {e}", desired.subject);
            result.errors.push(format!("{}: {e}", desired.subject));
        }
        result
    }

    /// Register the schema unless it already is the subject's latest version.
    async fn reconcile_version(
        &self,
        desired: &Schema,
        result: &mut SchemaResult,
    ) -> schema_registry::Result<()> {
        let subject = &desired.subject;
        let registered = self
            .reader
            .lookup(subject, &desired.schema, &desired.schema_type)
            .await?;

        if let Some(found) = registered {
            let versions = self.reader.versions(subject).await?;
            result.old_version = versions.last().copied();
            result.new_version = Some(found.version);
            result.schema_id = Some(found.id);
            result.must_register = result.old_version != Some(found.version);
            if result.must_register {
                info!(
                    "Subject {subject} has the schema at version {} but latest is {:?}",
                    found.version, result.old_version
                );
            }
        } else {
            result.old_version = self.reader.versions(subject).await?.last().copied();
            result.must_register = true;
        }

        if !result.must_register {
            debug!("Subject {subject} is up to date");
            return Ok(());
        }
        if self.dry_run {
            info!("Would register a new schema under {subject}");
            return Ok(());
        }

        let registered = self
            .writer
            .register(subject, &desired.schema, &desired.schema_type)
            .await?;
        info!(
            "Registered schema id {} as version {} of {subject}",
            registered.id, registered.version
        );
        result.new_version = Some(registered.version);
        result.schema_id = Some(registered.id);
        Ok(())
    }

    /// Push the desired level when it differs from both the subject's own
    /// level and the global default.
    async fn reconcile_compatibility(
        &self,
        desired: &Schema,
        result: &mut SchemaResult,
    ) -> schema_registry::Result<()> {
        let subject = &desired.subject;
        let current = self.reader.compatibility(subject).await?;
        let global = self.reader.global_compatibility().await?;

        result.old_compatibility = current.clone().or(global.clone()).unwrap_or_default();
        result.new_compatibility = result.old_compatibility.clone();

        if desired.compatibility.is_empty()
            || same_level(current.as_deref(), &desired.compatibility)
            || same_level(global.as_deref(), &desired.compatibility)
        {
            return Ok(());
        }

        let level = desired.compatibility.to_ascii_uppercase();
        if !self.dry_run {
            self.writer.set_compatibility(subject, &level).await?;
        }
        info!(
            "Compatibility of {subject}: {} -> {level} (dry run: {})",
            result.old_compatibility, self.dry_run
        );
        result.new_compatibility = level;
        result.compatibility_changed = true;
        Ok(())
    }
}
