use crate::error::{Error, Result};
use crate::session::{
    GroupSession, PartitionWatermark, Record, SessionEvent, SessionFactory, TopicPartition,
};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer as RdkafkaConsumer, ConsumerContext, Rebalance,
    StreamConsumer as RdkafkaStreamConsumer,
};
use rdkafka::message::{BorrowedMessage as RdkafkaBorrowedMessage, Message as RdkafkaMessage};
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Configuration for Kafka consumers
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// Auto offset reset strategy ("earliest" or "latest")
    ///
    /// Every reader in this tool uses a fresh group id, so this decides where
    /// a run starts. "earliest" is required to rebuild state from a compacted
    /// topic.
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    pub session_timeout_ms: String,
    /// Timeout for metadata and watermark queries
    pub metadata_timeout: Duration,
    /// Extra client properties, e.g. security settings prepared by the caller
    pub properties: BTreeMap<String, String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: "6000".to_string(),
            metadata_timeout: Duration::from_secs(10),
            properties: BTreeMap::new(),
        }
    }
}

impl ConsumerConfig {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        for (key, value) in &self.properties {
            config.set(key, value);
        }
        config
    }

    fn group_config(&self, group_id: &str) -> ClientConfig {
        let mut config = self.client_config();
        config
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", &self.session_timeout_ms)
            .set("enable.partition.eof", "false");
        config
    }
}

/// Forwards rebalance callbacks into the session's event stream.
struct RebalanceContext {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            let _ = self.events.send(SessionEvent::Revoked(partitions_of(tpl)));
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let _ = self.events.send(SessionEvent::Assigned(partitions_of(tpl)));
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(e) => warn!("Rebalance error: {e}"),
        }
    }
}

fn partitions_of(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|e| TopicPartition::new(e.topic(), e.partition()))
        .collect()
}

/// Rebalance events queued by the consumer context, ahead of records.
///
/// A poll can run the rebalance callback and return a record of the new
/// assignment at once; such a record waits until the event went out.
struct EventQueue {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    held: Option<Record>,
}

impl EventQueue {
    fn new(events: mpsc::UnboundedReceiver<SessionEvent>) -> Self {
        Self { events, held: None }
    }

    /// A queued rebalance event, else a held record.
    fn ready(&mut self) -> Option<SessionEvent> {
        if let Ok(event) = self.events.try_recv() {
            return Some(event);
        }
        self.held.take().map(SessionEvent::Record)
    }

    /// Order a freshly polled record behind rebalance events queued by the same poll.
    fn after_poll(&mut self, record: Record) -> SessionEvent {
        match self.events.try_recv() {
            Ok(event) => {
                self.held = Some(record);
                event
            }
            Err(_) => SessionEvent::Record(record),
        }
    }
}

/// Group session over an rdkafka stream consumer with manual commits
pub struct KafkaSession {
    consumer: RdkafkaStreamConsumer<RebalanceContext>,
    queue: EventQueue,
}

impl KafkaSession {
    fn new(config: &ConsumerConfig, group_id: &str, topics: &[String]) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer: RdkafkaStreamConsumer<RebalanceContext> = config
            .group_config(group_id)
            .create_with_context(RebalanceContext { events: tx })
            .map_err(|e| Error::Consumer(format!("Failed to create consumer: {e}")))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| Error::Consumer(format!("Failed to subscribe to topics: {e}")))?;

        Ok(Self {
            consumer,
            queue: EventQueue::new(rx),
        })
    }

    fn decode_message(msg: &RdkafkaBorrowedMessage) -> Record {
        Record {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|p| p.to_vec()),
            timestamp: msg.timestamp().to_millis(),
        }
    }
}

#[async_trait]
impl GroupSession for KafkaSession {
    async fn next_event(&mut self) -> Result<Option<SessionEvent>> {
        if let Some(event) = self.queue.ready() {
            return Ok(Some(event));
        }

        let record = tokio::select! {
            biased;
            Some(event) = self.queue.events.recv() => return Ok(Some(event)),
            msg = self.consumer.recv() => {
                let msg = msg.map_err(|e| Error::Consumer(format!("Error receiving message: {e}")))?;
                Self::decode_message(&msg)
            }
        };
        Ok(Some(self.queue.after_poll(record)))
    }

    fn commit(&mut self, record: &Record) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| Error::Consumer(format!("Failed to add partition offset: {e}")))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| Error::Consumer(format!("Failed to commit offset: {e}")))
    }

    async fn leave(&mut self) -> Result<()> {
        debug!("Unsubscribing consumer");
        self.consumer.unsubscribe();
        Ok(())
    }
}

/// Opens rdkafka-backed sessions against one cluster.
#[derive(Debug, Clone)]
pub struct KafkaSessionFactory {
    config: ConsumerConfig,
}

impl KafkaSessionFactory {
    pub fn new(config: ConsumerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }
}

#[async_trait]
impl SessionFactory for KafkaSessionFactory {
    async fn open(&self, group_id: &str, topics: &[String]) -> Result<Box<dyn GroupSession>> {
        Ok(Box::new(KafkaSession::new(&self.config, group_id, topics)?))
    }

    async fn watermarks(&self, topic: &str) -> Result<Vec<PartitionWatermark>> {
        let client_config = self.config.client_config();
        let timeout = self.config.metadata_timeout;
        let topic = topic.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<PartitionWatermark>> {
            let consumer: BaseConsumer = client_config.create()?;
            let metadata = consumer.fetch_metadata(Some(&topic), timeout)?;
            let meta_topic = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic && t.error().is_none())
                .ok_or_else(|| Error::UnknownTopic(topic.clone()))?;

            let mut watermarks = Vec::with_capacity(meta_topic.partitions().len());
            for partition in meta_topic.partitions() {
                let (low, high) = consumer.fetch_watermarks(&topic, partition.id(), timeout)?;
                watermarks.push(PartitionWatermark {
                    partition: partition.id(),
                    low,
                    high,
                });
            }
            Ok(watermarks)
        })
        .await
        .map_err(|e| Error::Consumer(format!("Watermark query failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(offset: i64) -> Record {
        Record {
            topic: "events".to_string(),
            partition: 0,
            offset,
            key: None,
            payload: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_assignment_from_same_poll_goes_first() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut queue = EventQueue::new(rx);

        // The poll that returned offset 0 also ran the assign callback
        tx.send(SessionEvent::Assigned(vec![TopicPartition::new("events", 0)]))
            .unwrap();
        let first = queue.after_poll(record(0));
        assert!(matches!(first, SessionEvent::Assigned(_)));

        match queue.ready() {
            Some(SessionEvent::Record(r)) => assert_eq!(r.offset, 0),
            other => panic!("expected held record, got {other:?}"),
        }
        assert!(queue.ready().is_none());

        match queue.after_poll(record(1)) {
            SessionEvent::Record(r) => assert_eq!(r.offset, 1),
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn test_group_config_disables_auto_commit() {
        let mut config = ConsumerConfig::default();
        config
            .properties
            .insert("security.protocol".to_string(), "SASL_SSL".to_string());

        let client = config.group_config("reconcile-1");
        assert_eq!(client.get("group.id"), Some("reconcile-1"));
        assert_eq!(client.get("enable.auto.commit"), Some("false"));
        assert_eq!(client.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(client.get("security.protocol"), Some("SASL_SSL"));
    }
}
