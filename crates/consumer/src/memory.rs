use crate::error::{Error, Result};
use crate::session::{
    GroupSession, PartitionWatermark, Record, SessionEvent, SessionFactory, TopicPartition,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MemoryLog {
    records: Vec<Record>,
    next_offsets: BTreeMap<TopicPartition, i64>,
    low_offsets: BTreeMap<TopicPartition, i64>,
    commits: BTreeMap<TopicPartition, i64>,
    left: bool,
    close_when_drained: bool,
}

/// An in-memory log that hands out group sessions.
///
/// Every session replays the whole log of its topics in append order, then
/// idles like a consumer at the head of a live topic (or closes, see
/// [`MemorySessionFactory::close_when_drained`]).
#[derive(Clone, Default)]
pub struct MemorySessionFactory {
    log: Arc<Mutex<MemoryLog>>,
}

impl MemorySessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a record at the partition's next offset and return that offset.
    pub fn push(
        &self,
        topic: &str,
        partition: i32,
        key: Option<Vec<u8>>,
        payload: Option<Vec<u8>>,
    ) -> i64 {
        let tp = TopicPartition::new(topic, partition);
        let offset = self.lock().next_offsets.get(&tp).copied().unwrap_or(0);
        self.push_at(topic, partition, offset, key, payload);
        offset
    }

    /// Append a record at an explicit offset, leaving a gap like compaction does.
    pub fn push_at(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        key: Option<Vec<u8>>,
        payload: Option<Vec<u8>>,
    ) {
        let mut log = self.lock();
        let tp = TopicPartition::new(topic, partition);
        log.low_offsets.entry(tp.clone()).or_insert(offset);
        log.next_offsets.insert(tp, offset + 1);
        log.records.push(Record {
            topic: topic.to_string(),
            partition,
            offset,
            key,
            payload,
            timestamp: Some(1_700_000_000_000 + offset),
        });
    }

    /// Sessions opened afterwards end once the log is drained.
    pub fn close_when_drained(&self) {
        self.lock().close_when_drained = true;
    }

    /// Committed position of a partition, if anything was acknowledged.
    pub fn committed(&self, topic: &str, partition: i32) -> Option<i64> {
        self.lock()
            .commits
            .get(&TopicPartition::new(topic, partition))
            .copied()
    }

    /// Whether a session left its group.
    pub fn left(&self) -> bool {
        self.lock().left
    }
}

#[async_trait]
impl SessionFactory for MemorySessionFactory {
    async fn open(&self, _group_id: &str, topics: &[String]) -> Result<Box<dyn GroupSession>> {
        let log = self.lock();
        let partitions: BTreeSet<TopicPartition> = log
            .next_offsets
            .keys()
            .filter(|tp| topics.contains(&tp.topic))
            .cloned()
            .collect();

        let mut events = VecDeque::new();
        if !partitions.is_empty() {
            events.push_back(SessionEvent::Assigned(partitions.into_iter().collect()));
        }
        events.extend(
            log.records
                .iter()
                .filter(|r| topics.contains(&r.topic))
                .cloned()
                .map(SessionEvent::Record),
        );

        Ok(Box::new(MemorySession {
            events,
            log: Arc::clone(&self.log),
            close_when_drained: log.close_when_drained,
        }))
    }

    async fn watermarks(&self, topic: &str) -> Result<Vec<PartitionWatermark>> {
        let log = self.lock();
        let watermarks: Vec<PartitionWatermark> = log
            .next_offsets
            .iter()
            .filter(|(tp, _)| tp.topic == topic)
            .map(|(tp, high)| PartitionWatermark {
                partition: tp.partition,
                low: log.low_offsets.get(tp).copied().unwrap_or(*high),
                high: *high,
            })
            .collect();

        if watermarks.is_empty() {
            return Err(Error::UnknownTopic(topic.to_string()));
        }
        Ok(watermarks)
    }
}

struct MemorySession {
    events: VecDeque<SessionEvent>,
    log: Arc<Mutex<MemoryLog>>,
    close_when_drained: bool,
}

impl MemorySession {
    fn lock(&self) -> MutexGuard<'_, MemoryLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl GroupSession for MemorySession {
    async fn next_event(&mut self) -> Result<Option<SessionEvent>> {
        if let Some(event) = self.events.pop_front() {
            return Ok(Some(event));
        }
        if self.close_when_drained {
            return Ok(None);
        }
        std::future::pending().await
    }

    fn commit(&mut self, record: &Record) -> Result<()> {
        self.lock().commits.insert(
            TopicPartition::new(record.topic.clone(), record.partition),
            record.offset + 1,
        );
        Ok(())
    }

    async fn leave(&mut self) -> Result<()> {
        self.events.clear();
        self.lock().left = true;
        Ok(())
    }
}
