use crate::engine::{Delegate, Flow};
use crate::error::Result;
use crate::session::{Record, TopicPartition};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::io::Write;
use std::sync::Mutex;

/// Writes one line per record: `topic/partition@offset [timestamp] key value`.
pub struct Viewer<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> Viewer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn render(record: &Record) -> String {
        let timestamp = record
            .timestamp
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| "-".to_string());
        let key = record
            .key
            .as_deref()
            .map(String::from_utf8_lossy)
            .unwrap_or_else(|| "<null>".into());
        let value = record
            .payload
            .as_deref()
            .map(String::from_utf8_lossy)
            .unwrap_or_else(|| "<tombstone>".into());

        format!(
            "{}/{}@{} [{timestamp}] {key} {value}",
            record.topic, record.partition, record.offset
        )
    }
}

#[async_trait]
impl<W: Write + Send> Delegate for Viewer<W> {
    async fn on_assigned(&self, partitions: &[TopicPartition]) -> Result<()> {
        tracing::debug!("Viewing {} partitions", partitions.len());
        Ok(())
    }

    async fn on_record(&self, record: &Record) -> Result<Flow> {
        let line = Self::render(record);
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(out, "{line}")?;
        Ok(Flow::Continue)
    }
}
