//! Test harness (C11): a purely in-memory broker for fast, deterministic
//! runner-level and unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::{BrokerClient, DeserializeFn, OffsetCommitter};
use crate::error::BrokerError;
use crate::record::{PartitionId, PollBatch, Record};

/// A `serde_json`-backed deserializer factory, for tests and examples that
/// want a realistic stand-in for a production deserializer rather than the
/// identity/no-op closures used elsewhere in this module. Mirrors the
/// `serde_json::from_slice(payload)` shape used throughout this codebase's
/// other Kafka consumers.
pub fn json_deserializer<T>() -> DeserializeFn<T>
where
    T: serde::de::DeserializeOwned + Send + Sync + 'static,
{
    Arc::new(|bytes: Option<&[u8]>| {
        let bytes = bytes.ok_or_else(|| anyhow::anyhow!("missing payload"))?;
        serde_json::from_slice(bytes).map_err(anyhow::Error::from)
    })
}

struct FakeBrokerState<K, V> {
    // Every record ever pushed, retained permanently: `poll` recomputes
    // what's still undelivered from `committed` rather than draining a
    // queue, so an abandoned (uncommitted) unit is redelivered on the next
    // poll -- the same at-least-once shape a real broker gives a consumer
    // that never advances its offset.
    records: Vec<Record<K, V>>,
    committed: HashMap<PartitionId, i64>,
    assignment: HashSet<PartitionId>,
    paused: HashSet<PartitionId>,
    closed: bool,
    commit_script: VecDeque<Result<(), BrokerError>>,
    commit_calls: u64,
}

/// A purely in-memory [`BrokerClient`]. `poll` returns every pushed record
/// whose offset has not yet been committed and whose partition is not
/// currently paused; `subscribe` always succeeds and just derives the
/// assignment from pushed records.
pub struct FakeBroker<K, V> {
    state: Mutex<FakeBrokerState<K, V>>,
}

impl<K, V> Default for FakeBroker<K, V> {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeBrokerState {
                records: Vec::new(),
                committed: HashMap::new(),
                assignment: HashSet::new(),
                paused: HashSet::new(),
                closed: false,
                commit_script: VecDeque::new(),
                commit_calls: 0,
            }),
        }
    }
}

impl<K, V> FakeBroker<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: Record<K, V>) {
        let mut state = self.state.lock().expect("fake broker poisoned");
        state.assignment.insert(record.partition.clone());
        state.records.push(record);
    }

    pub fn push_all(&self, records: impl IntoIterator<Item = Record<K, V>>) {
        for record in records {
            self.push(record);
        }
    }

    /// Queues `result` to be returned by the next `commit_sync` call(s), in
    /// order; once exhausted, `commit_sync` succeeds and records the offsets.
    pub fn script_commit(&self, result: Result<(), BrokerError>) {
        self.state
            .lock()
            .expect("fake broker poisoned")
            .commit_script
            .push_back(result);
    }

    pub fn committed(&self, partition: &PartitionId) -> Option<i64> {
        self.state.lock().expect("fake broker poisoned").committed.get(partition).copied()
    }

    pub fn commit_calls(&self) -> u64 {
        self.state.lock().expect("fake broker poisoned").commit_calls
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("fake broker poisoned").closed
    }
}

#[async_trait]
impl<K, V> OffsetCommitter for FakeBroker<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    async fn commit_sync(&self, offsets: &HashMap<PartitionId, i64>) -> Result<(), BrokerError> {
        let mut state = self.state.lock().expect("fake broker poisoned");
        state.commit_calls += 1;
        if let Some(scripted) = state.commit_script.pop_front() {
            return scripted;
        }
        for (partition, offset) in offsets {
            state.committed.insert(partition.clone(), *offset);
        }
        Ok(())
    }
}

#[async_trait]
impl<K, V> BrokerClient<K, V> for FakeBroker<K, V>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn subscribe(&self, _topics: &HashSet<String>) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn poll(&self, _timeout: Duration) -> Result<PollBatch<K, V>, BrokerError> {
        let state = self.state.lock().expect("fake broker poisoned");
        let records: Vec<_> = state
            .records
            .iter()
            .filter(|r| !state.paused.contains(&r.partition))
            .filter(|r| r.offset >= state.committed.get(&r.partition).copied().unwrap_or(0))
            .cloned()
            .collect();
        let partitions = records.iter().map(|r| r.partition.clone()).collect();
        Ok(PollBatch { records, partitions })
    }

    async fn pause(&self, partitions: &HashSet<PartitionId>) -> Result<(), BrokerError> {
        self.state.lock().expect("fake broker poisoned").paused.extend(partitions.iter().cloned());
        Ok(())
    }

    async fn resume(&self, partitions: &HashSet<PartitionId>) -> Result<(), BrokerError> {
        let mut state = self.state.lock().expect("fake broker poisoned");
        for p in partitions {
            state.paused.remove(p);
        }
        Ok(())
    }

    fn assignment(&self) -> Result<HashSet<PartitionId>, BrokerError> {
        Ok(self.state.lock().expect("fake broker poisoned").assignment.clone())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.state.lock().expect("fake broker poisoned").closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize, Debug, Clone, PartialEq)]
    struct Event {
        id: u32,
    }

    #[test]
    fn json_deserializer_decodes_struct_payloads() {
        let de = json_deserializer::<Event>();
        let decoded = de(Some(br#"{"id":1}"#)).unwrap();
        assert_eq!(decoded, Event { id: 1 });
    }

    #[test]
    fn json_deserializer_rejects_missing_payload() {
        let de = json_deserializer::<Event>();
        assert!(de(None).is_err());
    }

    fn rec(offset: i64) -> Record<i32, i32> {
        Record {
            partition: PartitionId::new("t", 0),
            offset,
            key: 0,
            value: offset as i32,
            timestamp: 0,
            headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn poll_stops_returning_records_once_committed() {
        let broker: FakeBroker<i32, i32> = FakeBroker::new();
        broker.push_all(vec![rec(0), rec(1)]);
        let batch = broker.poll(Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.len(), 2);

        let mut offsets = HashMap::new();
        offsets.insert(PartitionId::new("t", 0), 2);
        broker.commit_sync(&offsets).await.unwrap();

        let empty = broker.poll(Duration::from_millis(10)).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn uncommitted_records_are_redelivered() {
        let broker: FakeBroker<i32, i32> = FakeBroker::new();
        broker.push(rec(0));
        let first = broker.poll(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = broker.poll(Duration::from_millis(10)).await.unwrap();
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn paused_partitions_are_withheld_from_poll() {
        let broker: FakeBroker<i32, i32> = FakeBroker::new();
        broker.push(rec(0));
        let partitions = HashSet::from([PartitionId::new("t", 0)]);
        broker.pause(&partitions).await.unwrap();
        assert!(broker.poll(Duration::from_millis(10)).await.unwrap().is_empty());
        broker.resume(&partitions).await.unwrap();
        assert_eq!(broker.poll(Duration::from_millis(10)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_sync_records_offsets_and_honors_script() {
        let broker: FakeBroker<i32, i32> = FakeBroker::new();
        broker.script_commit(Err(BrokerError::CommitTimeout));
        let mut offsets = HashMap::new();
        offsets.insert(PartitionId::new("t", 0), 5);
        assert!(matches!(broker.commit_sync(&offsets).await, Err(BrokerError::CommitTimeout)));
        assert!(broker.commit_sync(&offsets).await.is_ok());
        assert_eq!(broker.committed(&PartitionId::new("t", 0)), Some(5));
        assert_eq!(broker.commit_calls(), 2);
    }
}
