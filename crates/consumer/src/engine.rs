use crate::error::{Error, Result};
use crate::session::{Record, SessionEvent, SessionFactory, TopicPartition};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delegate verdict after handling one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// The capability set every engine delegate provides.
///
/// Hooks take `&self`: a delegate that keeps state must guard it itself.
/// Records can be replayed after a failed run, so `on_record` must be
/// idempotent.
#[async_trait]
pub trait Delegate: Send + Sync {
    async fn on_assigned(&self, _partitions: &[TopicPartition]) -> Result<()> {
        Ok(())
    }

    async fn on_revoked(&self, _partitions: &[TopicPartition]) -> Result<()> {
        Ok(())
    }

    async fn on_record(&self, record: &Record) -> Result<Flow>;
}

/// When a run ends on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bound {
    #[default]
    Unbounded,
    /// Stop after this many records were handled.
    MaxRecords(u64),
    /// Stop once a record at or past this offset was handled.
    EndOffset(i64),
}

impl Bound {
    fn reached(&self, records: u64, offset: i64) -> Option<StopReason> {
        match *self {
            Bound::Unbounded => None,
            Bound::MaxRecords(max) if records >= max => Some(StopReason::MaxRecords),
            Bound::EndOffset(end) if offset >= end => Some(StopReason::EndOffset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Delegate,
    MaxRecords,
    EndOffset,
    Cancelled,
    SessionClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub records: u64,
    pub stop_reason: StopReason,
}

/// Consumer group id with a random suffix, so a run never resumes from
/// offsets committed by an earlier one.
pub fn random_group_id(prefix: &str) -> String {
    format!("{prefix}-{:08x}", rand::random::<u32>())
}

/// Drives one consumer-group membership and feeds a delegate.
#[derive(Clone)]
pub struct ConsumptionEngine {
    factory: Arc<dyn SessionFactory>,
}

impl ConsumptionEngine {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &Arc<dyn SessionFactory> {
        &self.factory
    }

    /// Run until the delegate stops, the bound is reached, the session closes
    /// or `cancel` fires, whichever comes first. The group is left before
    /// returning.
    pub async fn run(
        &self,
        group_id: &str,
        topics: &[String],
        delegate: Arc<dyn Delegate>,
        bound: Bound,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        self.run_inner(group_id, topics, delegate, bound, cancel, None)
            .await
    }

    /// Run on a background task.
    ///
    /// The returned handle resolves `wait_ready` after the first partition
    /// assignment (or when the run ends before any).
    pub fn spawn(
        &self,
        group_id: String,
        topics: Vec<String>,
        delegate: Arc<dyn Delegate>,
        bound: Bound,
    ) -> EngineHandle {
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let engine = self.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            engine
                .run_inner(
                    &group_id,
                    &topics,
                    delegate,
                    bound,
                    task_cancel,
                    Some(ready_tx),
                )
                .await
        });

        EngineHandle {
            ready: Some(ready_rx),
            task,
            cancel,
        }
    }

    async fn run_inner(
        &self,
        group_id: &str,
        topics: &[String],
        delegate: Arc<dyn Delegate>,
        bound: Bound,
        cancel: CancellationToken,
        mut ready: Option<oneshot::Sender<()>>,
    ) -> Result<RunSummary> {
        if bound == Bound::MaxRecords(0) {
            return Ok(RunSummary {
                records: 0,
                stop_reason: StopReason::MaxRecords,
            });
        }

        info!("Joining consumer group {group_id} for topics {topics:?} ({bound:?})");
        let mut session = self.factory.open(group_id, topics).await?;
        let mut records = 0u64;

        let outcome: Result<StopReason> = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(StopReason::Cancelled),
                event = session.next_event() => event,
            };

            match event {
                Err(e) => break Err(e),
                Ok(None) => break Ok(StopReason::SessionClosed),
                Ok(Some(SessionEvent::Assigned(partitions))) => {
                    debug!("Assigned partitions: {partitions:?}");
                    if let Err(e) = delegate.on_assigned(&partitions).await {
                        break Err(e);
                    }
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(());
                    }
                }
                Ok(Some(SessionEvent::Revoked(partitions))) => {
                    debug!("Revoked partitions: {partitions:?}");
                    if let Err(e) = delegate.on_revoked(&partitions).await {
                        break Err(e);
                    }
                }
                Ok(Some(SessionEvent::Record(record))) => {
                    let flow = match delegate.on_record(&record).await {
                        Ok(flow) => flow,
                        Err(e) => break Err(e),
                    };
                    if let Err(e) = session.commit(&record) {
                        break Err(e);
                    }
                    records += 1;

                    if flow == Flow::Stop {
                        break Ok(StopReason::Delegate);
                    }
                    if let Some(reason) = bound.reached(records, record.offset) {
                        break Ok(reason);
                    }
                }
            }
        };

        if let Err(e) = session.leave().await {
            warn!("Failed to leave consumer group {group_id}: {e}");
        }

        let stop_reason = outcome?;
        info!("Consumer group {group_id} stopped after {records} records ({stop_reason:?})");
        Ok(RunSummary {
            records,
            stop_reason,
        })
    }
}

/// Handle to an engine run started with [`ConsumptionEngine::spawn`].
pub struct EngineHandle {
    ready: Option<oneshot::Receiver<()>>,
    task: JoinHandle<Result<RunSummary>>,
    cancel: CancellationToken,
}

impl EngineHandle {
    /// Wait until partitions were assigned or the run already ended.
    pub async fn wait_ready(&mut self) {
        if let Some(ready) = self.ready.take() {
            // A dropped sender means the run ended before any assignment
            let _ = ready.await;
        }
    }

    /// Ask the run to stop; `join` still has to be awaited.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn join(self) -> Result<RunSummary> {
        self.task
            .await
            .map_err(|e| Error::Consumer(format!("Engine task failed: {e}")))?
    }
}
