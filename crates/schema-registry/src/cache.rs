use crate::error::{Error, Result};
use crate::source::{RegisteredSchema, RegistryReader};
use crate::wire::{ConfigValue, KeyType, RegistryKey, SchemaValue};
use async_trait::async_trait;
use kafka_reconcile_consumer::{
    random_group_id, Bound, ConsumptionEngine, Delegate, Flow, Record, StopReason,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Internal topic the registry keeps its state in
pub const DEFAULT_REGISTRY_TOPIC: &str = "_schemas";

/// Registry state rebuilt from the change-log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheState {
    /// schema id -> schema text
    schemas: HashMap<i32, String>,
    /// subject -> version -> schema id
    subjects: BTreeMap<String, BTreeMap<i32, i32>>,
    /// subject -> compatibility override
    compat_per_subject: BTreeMap<String, String>,
    global_compatibility: Option<String>,
}

impl CacheState {
    /// Apply one change-log record. Map writes make replays harmless.
    pub fn apply(&mut self, record: &Record) -> Result<()> {
        let key_bytes = record.key.as_deref().ok_or_else(|| Error::Decode {
            offset: record.offset,
            message: "record has no key".to_string(),
        })?;
        let key: RegistryKey = decode(record.offset, key_bytes)?;

        match key.keytype {
            KeyType::Schema => self.apply_schema(record, &key),
            KeyType::Config => self.apply_config(record, &key),
            KeyType::Noop => Ok(()),
            KeyType::Other => {
                debug!("Ignoring change-log key at offset {}: {key:?}", record.offset);
                Ok(())
            }
        }
    }

    fn apply_schema(&mut self, record: &Record, key: &RegistryKey) -> Result<()> {
        let Some(payload) = record.payload.as_deref() else {
            let (subject, version) = schema_key_parts(record.offset, key)?;
            self.remove_version(subject, version);
            return Ok(());
        };

        let value: SchemaValue = decode(record.offset, payload)?;
        if value.deleted {
            self.remove_version(&value.subject, value.version);
        } else {
            self.schemas.insert(value.id, value.schema);
            self.subjects
                .entry(value.subject)
                .or_default()
                .insert(value.version, value.id);
        }
        Ok(())
    }

    fn apply_config(&mut self, record: &Record, key: &RegistryKey) -> Result<()> {
        let level = match record.payload.as_deref() {
            Some(payload) => decode::<ConfigValue>(record.offset, payload)?.compatibility_level,
            None => None,
        };

        match (&key.subject, level) {
            (Some(subject), Some(level)) => {
                self.compat_per_subject.insert(subject.clone(), level);
            }
            (Some(subject), None) => {
                self.compat_per_subject.remove(subject);
            }
            (None, level) => self.global_compatibility = level,
        }
        Ok(())
    }

    fn remove_version(&mut self, subject: &str, version: i32) {
        if let Some(versions) = self.subjects.get_mut(subject) {
            versions.remove(&version);
            if versions.is_empty() {
                self.subjects.remove(subject);
            }
        }
    }

    pub fn schema_for(&self, subject: &str, version: i32) -> Option<&str> {
        let id = self.subjects.get(subject)?.get(&version)?;
        self.schemas.get(id).map(String::as_str)
    }

    pub fn versions(&self, subject: &str) -> Vec<i32> {
        self.subjects
            .get(subject)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn latest_version(&self, subject: &str) -> Option<i32> {
        self.subjects.get(subject)?.keys().next_back().copied()
    }

    /// Latest version of `subject` whose text equals `schema`.
    pub fn lookup(&self, subject: &str, schema: &str) -> Option<RegisteredSchema> {
        self.subjects
            .get(subject)?
            .iter()
            .rev()
            .find(|(_, id)| self.schemas.get(id).is_some_and(|text| text == schema))
            .map(|(version, id)| RegisteredSchema {
                id: *id,
                version: *version,
            })
    }

    pub fn compatibility(&self, subject: &str) -> Option<&str> {
        self.compat_per_subject.get(subject).map(String::as_str)
    }

    pub fn global_compatibility(&self) -> Option<&str> {
        self.global_compatibility.as_deref()
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }
}

fn decode<T: serde::de::DeserializeOwned>(offset: i64, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Decode {
        offset,
        message: e.to_string(),
    })
}

fn schema_key_parts(offset: i64, key: &RegistryKey) -> Result<(&str, i32)> {
    match (key.subject.as_deref(), key.version) {
        (Some(subject), Some(version)) => Ok((subject, version)),
        _ => Err(Error::Decode {
            offset,
            message: "SCHEMA key without subject or version".to_string(),
        }),
    }
}

/// Point-in-time copy of the registry, read from its change-log topic.
///
/// The cache holds exactly the records up to the per-partition end offsets
/// captured when the bootstrap started. Records the engine delivers past
/// those offsets are ignored.
pub struct SchemaRegistryCache {
    topic: String,
    // Every map of the state sits behind this one lock: the engine may hand
    // records of different partitions to the delegate concurrently.
    state: RwLock<CacheState>,
    watermarks: BTreeMap<i32, i64>,
    pending: Mutex<BTreeMap<i32, i64>>,
}

impl SchemaRegistryCache {
    /// An empty cache that completes once every partition in `watermarks`
    /// (partition -> last offset) has been read up to its offset.
    pub fn new(topic: impl Into<String>, watermarks: BTreeMap<i32, i64>) -> Self {
        Self {
            topic: topic.into(),
            state: RwLock::new(CacheState::default()),
            pending: Mutex::new(watermarks.clone()),
            watermarks,
        }
    }

    /// Rebuild registry state from `topic`.
    ///
    /// Fails on the first malformed record, and when the run ends (cancelled,
    /// session closed) before every partition reached its end offset.
    pub async fn bootstrap(
        engine: &ConsumptionEngine,
        topic: &str,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let watermarks: BTreeMap<i32, i64> = engine
            .factory()
            .watermarks(topic)
            .await?
            .into_iter()
            .filter_map(|wm| wm.last_offset().map(|last| (wm.partition, last)))
            .collect();
        info!("Bootstrapping schema registry cache from {topic} up to {watermarks:?}");

        let cache = Arc::new(Self::new(topic, watermarks));
        if cache.is_complete() {
            info!("Registry topic {topic} is empty");
            return Ok(cache);
        }

        let group_id = random_group_id("kafka-reconcile-registry");
        let summary = engine
            .run(
                &group_id,
                &[topic.to_string()],
                cache.clone(),
                Bound::Unbounded,
                cancel,
            )
            .await
            .map_err(Error::from_engine)?;

        if summary.stop_reason != StopReason::Delegate || !cache.is_complete() {
            return Err(Error::Incomplete(format!(
                "stopped after {} records ({:?})",
                summary.records, summary.stop_reason
            )));
        }

        let state = cache.state();
        info!(
            "Schema registry cache ready: {} subjects, {} schemas from {} records",
            state.subject_count(),
            state.schema_count(),
            summary.records
        );
        drop(state);
        Ok(cache)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Last offset per partition the cache was built up to.
    pub fn watermarks(&self) -> &BTreeMap<i32, i64> {
        &self.watermarks
    }

    pub fn is_complete(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_empty()
    }

    pub fn state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply a record directly, bypassing the watermark bookkeeping.
    pub fn apply(&self, record: &Record) -> Result<()> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .apply(record)
    }

    pub fn schema_for(&self, subject: &str, version: i32) -> Option<String> {
        self.state().schema_for(subject, version).map(str::to_string)
    }
}

#[async_trait]
impl Delegate for SchemaRegistryCache {
    async fn on_record(&self, record: &Record) -> kafka_reconcile_consumer::Result<Flow> {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(&end) = pending.get(&record.partition) else {
            return Ok(if pending.is_empty() {
                Flow::Stop
            } else {
                Flow::Continue
            });
        };
        if record.offset > end {
            return Ok(Flow::Continue);
        }

        self.apply(record)
            .map_err(kafka_reconcile_consumer::Error::delegate)?;

        if record.offset >= end {
            pending.remove(&record.partition);
        }
        Ok(if pending.is_empty() {
            Flow::Stop
        } else {
            Flow::Continue
        })
    }
}

#[async_trait]
impl RegistryReader for SchemaRegistryCache {
    async fn lookup(
        &self,
        subject: &str,
        schema: &str,
        _schema_type: &str,
    ) -> Result<Option<RegisteredSchema>> {
        Ok(self.state().lookup(subject, schema))
    }

    async fn versions(&self, subject: &str) -> Result<Vec<i32>> {
        Ok(self.state().versions(subject))
    }

    async fn compatibility(&self, subject: &str) -> Result<Option<String>> {
        Ok(self.state().compatibility(subject).map(str::to_string))
    }

    async fn global_compatibility(&self) -> Result<Option<String>> {
        Ok(self.state().global_compatibility().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafka_reconcile_consumer::memory::MemorySessionFactory;

    fn key(k: &RegistryKey) -> Option<Vec<u8>> {
        Some(serde_json::to_vec(k).unwrap())
    }

    fn schema_value(subject: &str, version: i32, id: i32, schema: &str, deleted: bool) -> Option<Vec<u8>> {
        Some(
            serde_json::to_vec(&SchemaValue {
                subject: subject.to_string(),
                version,
                id,
                schema: schema.to_string(),
                deleted,
                schema_type: None,
            })
            .unwrap(),
        )
    }

    fn config_value(level: &str) -> Option<Vec<u8>> {
        Some(format!(r#"{{"compatibilityLevel":"{level}"}}"#).into_bytes())
    }

    fn record(offset: i64, key: Option<Vec<u8>>, payload: Option<Vec<u8>>) -> Record {
        Record {
            topic: DEFAULT_REGISTRY_TOPIC.to_string(),
            partition: 0,
            offset,
            key,
            payload,
            timestamp: None,
        }
    }

    #[test]
    fn test_schema_then_tombstone_removes_version() {
        let mut state = CacheState::default();
        let k = key(&RegistryKey::schema("S", 1));
        state.apply(&record(0, k.clone(), schema_value("S", 1, 7, "X", false))).unwrap();
        assert_eq!(state.schema_for("S", 1), Some("X"));

        state.apply(&record(1, k, None)).unwrap();
        assert_eq!(state.schema_for("S", 1), None);
        assert!(state.versions("S").is_empty());
    }

    #[test]
    fn test_config_then_tombstone_removes_override() {
        let mut state = CacheState::default();
        let k = key(&RegistryKey::config(Some("S")));
        state.apply(&record(0, k.clone(), config_value("FULL"))).unwrap();
        assert_eq!(state.compatibility("S"), Some("FULL"));

        state.apply(&record(1, k, None)).unwrap();
        assert_eq!(state.compatibility("S"), None);
    }

    #[test]
    fn test_soft_delete_keeps_other_versions() {
        let mut state = CacheState::default();
        state.apply(&record(0, key(&RegistryKey::schema("S", 1)), schema_value("S", 1, 1, "A", false))).unwrap();
        state.apply(&record(1, key(&RegistryKey::schema("S", 2)), schema_value("S", 2, 2, "B", false))).unwrap();
        state.apply(&record(2, key(&RegistryKey::schema("S", 1)), schema_value("S", 1, 1, "A", true))).unwrap();

        assert_eq!(state.versions("S"), vec![2]);
        assert_eq!(state.latest_version("S"), Some(2));
        assert_eq!(state.schema_for("S", 1), None);
        assert_eq!(state.schema_for("S", 2), Some("B"));
    }

    #[test]
    fn test_global_config_and_noop() {
        let mut state = CacheState::default();
        state.apply(&record(0, key(&RegistryKey::config(None)), config_value("BACKWARD"))).unwrap();
        state.apply(&record(1, key(&RegistryKey::noop()), None)).unwrap();
        assert_eq!(state.global_compatibility(), Some("BACKWARD"));
        assert_eq!(state.subject_count(), 0);
    }

    #[test]
    fn test_lookup_prefers_latest_matching_version() {
        let mut state = CacheState::default();
        state.apply(&record(0, key(&RegistryKey::schema("S", 1)), schema_value("S", 1, 1, "A", false))).unwrap();
        state.apply(&record(1, key(&RegistryKey::schema("S", 2)), schema_value("S", 2, 2, "B", false))).unwrap();
        state.apply(&record(2, key(&RegistryKey::schema("S", 3)), schema_value("S", 3, 1, "A", false))).unwrap();

        assert_eq!(state.lookup("S", "A"), Some(RegisteredSchema { id: 1, version: 3 }));
        assert_eq!(state.lookup("S", "C"), None);
        assert_eq!(state.lookup("T", "A"), None);
    }

    #[test]
    fn test_malformed_key_is_a_decode_error() {
        let mut state = CacheState::default();
        let err = state
            .apply(&record(9, Some(b"not json".to_vec()), None))
            .unwrap_err();
        assert!(matches!(err, Error::Decode { offset: 9, .. }));
    }

    fn seeded_factory() -> Arc<MemorySessionFactory> {
        let factory = MemorySessionFactory::new();
        let push = |k: &RegistryKey, v: Option<Vec<u8>>| {
            factory.push(DEFAULT_REGISTRY_TOPIC, 0, key(k), v);
        };
        push(&RegistryKey::config(None), config_value("BACKWARD"));
        push(&RegistryKey::schema("orders-value", 1), schema_value("orders-value", 1, 10, "V1", false));
        push(&RegistryKey::schema("orders-value", 2), schema_value("orders-value", 2, 11, "V2", false));
        push(&RegistryKey::config(Some("orders-value")), config_value("FULL"));
        push(&RegistryKey::noop(), None);
        Arc::new(factory)
    }

    #[tokio::test]
    async fn test_bootstrap_stops_at_watermark() {
        let factory = seeded_factory();
        let engine = ConsumptionEngine::new(factory.clone());

        let cache = SchemaRegistryCache::bootstrap(&engine, DEFAULT_REGISTRY_TOPIC, CancellationToken::new())
            .await
            .unwrap();

        assert!(cache.is_complete());
        assert_eq!(cache.watermarks().get(&0), Some(&4));
        assert_eq!(cache.schema_for("orders-value", 2).as_deref(), Some("V2"));
        assert_eq!(cache.versions("orders-value").await.unwrap(), vec![1, 2]);
        assert_eq!(cache.compatibility("orders-value").await.unwrap().as_deref(), Some("FULL"));
        assert_eq!(cache.global_compatibility().await.unwrap().as_deref(), Some("BACKWARD"));
        assert!(factory.left());
    }

    #[tokio::test]
    async fn test_records_past_watermark_are_ignored() {
        let cache = SchemaRegistryCache::new(DEFAULT_REGISTRY_TOPIC, BTreeMap::from([(0, 2)]));

        // A record written after the watermark was captured
        let late = record(
            3,
            key(&RegistryKey::schema("late-value", 1)),
            schema_value("late-value", 1, 99, "L", false),
        );
        for offset in 0..=2 {
            let r = record(
                offset,
                key(&RegistryKey::schema("orders-value", offset as i32 + 1)),
                schema_value("orders-value", offset as i32 + 1, offset as i32, "X", false),
            );
            let flow = cache.on_record(&r).await.unwrap();
            assert_eq!(flow == Flow::Stop, offset == 2);
        }
        assert_eq!(cache.on_record(&late).await.unwrap(), Flow::Stop);
        assert_eq!(cache.schema_for("late-value", 1), None);
    }

    #[test]
    fn test_empty_topic_is_complete_immediately() {
        let cache = SchemaRegistryCache::new(DEFAULT_REGISTRY_TOPIC, BTreeMap::new());
        assert!(cache.is_complete());
        assert_eq!(cache.state().subject_count(), 0);
    }

    #[tokio::test]
    async fn test_bootstrap_aborts_on_malformed_record() {
        let factory = seeded_factory();
        factory.push(DEFAULT_REGISTRY_TOPIC, 0, Some(b"{".to_vec()), None);
        let engine = ConsumptionEngine::new(factory.clone());

        let err = SchemaRegistryCache::bootstrap(&engine, DEFAULT_REGISTRY_TOPIC, CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, Error::Decode { offset: 5, .. }), "{err}");
    }

    #[tokio::test]
    async fn test_bootstrap_reads_every_partition_to_its_own_end() {
        let factory = MemorySessionFactory::new();
        let push = |partition: i32, k: &RegistryKey, v: Option<Vec<u8>>| {
            factory.push(DEFAULT_REGISTRY_TOPIC, partition, key(k), v);
        };
        push(0, &RegistryKey::schema("a-value", 1), schema_value("a-value", 1, 1, "X1", false));
        push(1, &RegistryKey::schema("b-value", 1), schema_value("b-value", 1, 2, "X2", false));
        push(0, &RegistryKey::schema("a-value", 2), schema_value("a-value", 2, 3, "X3", false));
        push(0, &RegistryKey::config(Some("a-value")), config_value("NONE"));
        let factory = Arc::new(factory);
        let engine = ConsumptionEngine::new(factory.clone());

        let cache = SchemaRegistryCache::bootstrap(&engine, DEFAULT_REGISTRY_TOPIC, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(cache.watermarks(), &BTreeMap::from([(0, 2), (1, 0)]));
        assert_eq!(cache.schema_for("a-value", 2).as_deref(), Some("X3"));
        assert_eq!(cache.schema_for("b-value", 1).as_deref(), Some("X2"));
        assert_eq!(cache.compatibility("a-value").await.unwrap().as_deref(), Some("NONE"));
        assert!(factory.left());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_partitions_share_one_state() {
        let cache = Arc::new(SchemaRegistryCache::new(
            DEFAULT_REGISTRY_TOPIC,
            BTreeMap::from([(0, 49), (1, 49)]),
        ));

        let tasks: Vec<_> = [0, 1]
            .into_iter()
            .map(|partition| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let subject = format!("s{partition}-value");
                    for offset in 0..50 {
                        let version = offset as i32 + 1;
                        let id = partition * 100 + version;
                        let r = Record {
                            partition,
                            ..record(
                                offset,
                                key(&RegistryKey::schema(&subject, version)),
                                schema_value(&subject, version, id, &format!("{subject}:{version}"), false),
                            )
                        };
                        cache.on_record(&r).await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(cache.is_complete());
        for partition in 0..2 {
            let subject = format!("s{partition}-value");
            assert_eq!(cache.versions(&subject).await.unwrap().len(), 50);
            assert_eq!(
                cache.lookup(&subject, &format!("{subject}:50"), "AVRO").await.unwrap(),
                Some(RegisteredSchema {
                    id: partition * 100 + 50,
                    version: 50
                })
            );
        }
        assert_eq!(cache.state().schema_count(), 100);
    }

    #[tokio::test]
    async fn test_bootstrap_cancelled_is_incomplete() {
        let factory = MemorySessionFactory::new();
        factory.push(DEFAULT_REGISTRY_TOPIC, 0, key(&RegistryKey::noop()), None);
        let engine = ConsumptionEngine::new(Arc::new(factory));

        // Cancelled before the first record is read
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = SchemaRegistryCache::bootstrap(&engine, DEFAULT_REGISTRY_TOPIC, cancel)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, Error::Incomplete(_)));
    }
}
