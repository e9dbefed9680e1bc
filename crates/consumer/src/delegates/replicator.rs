use crate::engine::{Delegate, Flow};
use crate::error::{Error, Result};
use crate::session::Record;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Where replicated records go.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn send(&self, topic: &str, key: Option<&[u8]>, payload: Option<&[u8]>) -> Result<()>;
}

/// Record sink backed by an rdkafka future producer
pub struct KafkaSink {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaSink {
    pub fn new(brokers: &str, properties: &BTreeMap<String, String>) -> Result<Self> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "30000");
        for (key, value) in properties {
            config.set(key, value);
        }
        let producer: FutureProducer = config.create()?;

        Ok(Self {
            producer,
            timeout: Duration::from_secs(30),
        })
    }
}

#[async_trait]
impl RecordSink for KafkaSink {
    async fn send(&self, topic: &str, key: Option<&[u8]>, payload: Option<&[u8]>) -> Result<()> {
        let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(topic);
        if let Some(key) = key {
            record = record.key(key);
        }
        if let Some(payload) = payload {
            record = record.payload(payload);
        }

        self.producer
            .send(record, self.timeout)
            .await
            .map(|_| ())
            .map_err(|(e, _)| Error::Producer(format!("Failed to deliver to {topic}: {e}")))
    }
}

/// Copies every record it sees to a target topic, tombstones included.
pub struct Replicator<S> {
    sink: S,
    target: String,
    replicated: AtomicU64,
}

impl<S: RecordSink> Replicator<S> {
    pub fn new(sink: S, target: impl Into<String>) -> Self {
        Self {
            sink,
            target: target.into(),
            replicated: AtomicU64::new(0),
        }
    }

    pub fn replicated(&self) -> u64 {
        self.replicated.load(Ordering::SeqCst)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[async_trait]
impl<S: RecordSink> Delegate for Replicator<S> {
    async fn on_record(&self, record: &Record) -> Result<Flow> {
        if record.topic == self.target {
            return Err(Error::InvalidConfig(format!(
                "Refusing to replicate topic {} onto itself",
                self.target
            )));
        }

        debug!(
            "Replicating {}/{}@{} to {}",
            record.topic, record.partition, record.offset, self.target
        );
        self.sink
            .send(&self.target, record.key.as_deref(), record.payload.as_deref())
            .await?;

        let count = self.replicated.fetch_add(1, Ordering::SeqCst) + 1;
        if count % 1000 == 0 {
            info!("Replicated {count} records to {}", self.target);
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Bound, ConsumptionEngine};
    use crate::memory::MemorySessionFactory;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    type Sent = (String, Option<Vec<u8>>, Option<Vec<u8>>);

    #[derive(Default)]
    struct CollectingSink {
        sent: Mutex<Vec<Sent>>,
    }

    #[async_trait]
    impl RecordSink for CollectingSink {
        async fn send(&self, topic: &str, key: Option<&[u8]>, payload: Option<&[u8]>) -> Result<()> {
            self.sent.lock().unwrap().push((
                topic.to_string(),
                key.map(|k| k.to_vec()),
                payload.map(|p| p.to_vec()),
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_replicates_until_bound() {
        let factory = Arc::new(MemorySessionFactory::new());
        factory.push("src", 0, Some(b"a".to_vec()), Some(b"1".to_vec()));
        factory.push("src", 0, Some(b"a".to_vec()), None);
        factory.push("src", 0, Some(b"b".to_vec()), Some(b"2".to_vec()));

        let replicator = Arc::new(Replicator::new(CollectingSink::default(), "dst"));
        let engine = ConsumptionEngine::new(factory);
        let summary = engine
            .run(
                "copy",
                &["src".to_string()],
                replicator.clone(),
                Bound::MaxRecords(2),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.records, 2);
        assert_eq!(replicator.replicated(), 2);
        let sent = replicator.sink().sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![
                ("dst".to_string(), Some(b"a".to_vec()), Some(b"1".to_vec())),
                ("dst".to_string(), Some(b"a".to_vec()), None),
            ]
        );
    }

    #[tokio::test]
    async fn test_refuses_self_replication() {
        let replicator = Replicator::new(CollectingSink::default(), "src");
        let record = Record {
            topic: "src".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: Some(b"x".to_vec()),
            timestamp: None,
        };
        assert!(replicator.on_record(&record).await.is_err());
    }
}
