//! The group-session seam between the engine and the consumer substrate.

use crate::error::Result;
use async_trait::async_trait;

/// A topic partition handed to this group member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

/// A record read from the log, detached from the client's buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Kafka topic
    pub topic: String,
    /// Kafka partition
    pub partition: i32,
    /// Kafka offset
    pub offset: i64,
    /// Record key (if any)
    pub key: Option<Vec<u8>>,
    /// Record value; `None` is a tombstone
    pub payload: Option<Vec<u8>>,
    /// Record timestamp (milliseconds since epoch)
    pub timestamp: Option<i64>,
}

impl Record {
    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }
}

/// Log-end position of one partition, captured before a bounded read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionWatermark {
    pub partition: i32,
    /// Earliest retained offset
    pub low: i64,
    /// Offset the next produced record will get
    pub high: i64,
}

impl PartitionWatermark {
    /// Offset of the last record currently in the partition, if any.
    pub fn last_offset(&self) -> Option<i64> {
        (self.high > self.low).then(|| self.high - 1)
    }
}

/// What a group session can deliver to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Assigned(Vec<TopicPartition>),
    Revoked(Vec<TopicPartition>),
    Record(Record),
}

/// One live consumer-group membership.
///
/// Implementations funnel rebalance callbacks and fetched records through
/// `next_event`, so the engine sees one ordered stream per membership.
#[async_trait]
pub trait GroupSession: Send {
    /// Wait for the next event. `Ok(None)` means the session closed on its own.
    async fn next_event(&mut self) -> Result<Option<SessionEvent>>;

    /// Acknowledge a record; the committed position is `offset + 1`.
    fn commit(&mut self, record: &Record) -> Result<()>;

    /// Leave the group. No events are delivered afterwards.
    async fn leave(&mut self) -> Result<()>;
}

/// Opens group sessions and answers offset queries against the same cluster.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, group_id: &str, topics: &[String]) -> Result<Box<dyn GroupSession>>;

    /// Current low/high watermarks of every partition of `topic`.
    async fn watermarks(&self, topic: &str) -> Result<Vec<PartitionWatermark>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_offset_of_empty_partition() {
        let wm = PartitionWatermark {
            partition: 0,
            low: 5,
            high: 5,
        };
        assert_eq!(wm.last_offset(), None);
    }

    #[test]
    fn test_last_offset_of_compacted_partition() {
        let wm = PartitionWatermark {
            partition: 0,
            low: 3,
            high: 10,
        };
        assert_eq!(wm.last_offset(), Some(9));
    }
}
