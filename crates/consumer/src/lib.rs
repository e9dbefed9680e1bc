//! Consumer-group engine used by every log reader in kafka-reconcile.
//!
//! Features:
//!
//! - Bounded runs: stop after a record count, at a target offset, or on cancellation
//! - Pluggable delegates: the engine only knows the `Delegate` hooks, not what they do
//! - Substrate seam: the rdkafka group session sits behind `SessionFactory`, so the
//!   engine runs the same way against an in-memory log
//! - Per-record commits: at-least-once delivery, delegates must tolerate replays

/// The engine loop, run bounds and the delegate capability set
pub mod engine;

/// rdkafka-backed group session and consumer configuration
pub mod consumer;
pub mod delegates;
pub mod error;

/// In-memory group session, for offline replay and tests
pub mod memory;
pub mod session;

pub use consumer::{ConsumerConfig, KafkaSessionFactory};
pub use delegates::{KafkaSink, RecordSink, Replicator, Viewer};
pub use engine::{
    random_group_id, Bound, ConsumptionEngine, Delegate, EngineHandle, Flow, RunSummary,
    StopReason,
};
pub use error::{Error, Result};
pub use session::{GroupSession, PartitionWatermark, Record, SessionEvent, SessionFactory, TopicPartition};
