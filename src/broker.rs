//! The broker client contract (§6, External Interfaces) and the `rdkafka`
//! adapter that implements it (C9 in SPEC_FULL).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};

use crate::error::BrokerError;
use crate::record::{PartitionId, PollBatch, Record};

/// The subset of the broker contract needed to commit offsets. Deliberately
/// not generic over `K`/`V` so the Commit Engine (C3) and `UnitFactory` can
/// hold it as a plain trait object regardless of what a particular Runner
/// is consuming.
#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    async fn commit_sync(&self, offsets: &HashMap<PartitionId, i64>) -> Result<(), BrokerError>;
}

/// The full broker contract consumed by the Consumer Runner (C6).
#[async_trait]
pub trait BrokerClient<K, V>: OffsetCommitter {
    async fn subscribe(&self, topics: &HashSet<String>) -> Result<(), BrokerError>;

    /// Polls for up to `timeout`. A batch with no records is a normal,
    /// expected outcome, not an error.
    async fn poll(&self, timeout: Duration) -> Result<PollBatch<K, V>, BrokerError>;

    async fn pause(&self, partitions: &HashSet<PartitionId>) -> Result<(), BrokerError>;

    async fn resume(&self, partitions: &HashSet<PartitionId>) -> Result<(), BrokerError>;

    fn assignment(&self) -> Result<HashSet<PartitionId>, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// A deserializer factory: produced once per `Config` and called once per
/// message. Receives `None` for a null key/value (e.g. compacted-topic
/// tombstones) so the caller decides how to represent absence in `T`.
pub type DeserializeFn<T> = Arc<dyn Fn(Option<&[u8]>) -> Result<T, anyhow::Error> + Send + Sync>;

/// `rdkafka`-backed implementation of [`BrokerClient`], confined to the
/// Runner's single driver execution context (the underlying
/// `StreamConsumer` is not thread-safe).
pub struct RdKafkaBrokerClient<K, V> {
    consumer: StreamConsumer,
    key_deserializer: DeserializeFn<K>,
    value_deserializer: DeserializeFn<V>,
}

impl<K, V> RdKafkaBrokerClient<K, V> {
    pub fn new(
        bootstrap_servers: &str,
        group_id: &str,
        auto_offset_reset: &str,
        key_deserializer: DeserializeFn<K>,
        value_deserializer: DeserializeFn<V>,
    ) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("auto.offset.reset", auto_offset_reset)
            // The runner owns offset advancement explicitly: it never
            // relies on librdkafka's background auto-commit or
            // auto-store, only on the Commit Engine's commit_sync calls.
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .create()?;

        Ok(Self {
            consumer,
            key_deserializer,
            value_deserializer,
        })
    }
}

#[async_trait]
impl<K, V> OffsetCommitter for RdKafkaBrokerClient<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    async fn commit_sync(&self, offsets: &HashMap<PartitionId, i64>) -> Result<(), BrokerError> {
        let mut tpl = TopicPartitionList::new();
        for (partition, offset) in offsets {
            tpl.add_partition_offset(&partition.topic, partition.partition, Offset::Offset(*offset))?;
        }
        match self.consumer.commit(&tpl, rdkafka::consumer::CommitMode::Sync) {
            Ok(()) => Ok(()),
            Err(e) if e.rdkafka_error_code() == Some(rdkafka::types::RDKafkaErrorCode::OperationTimedOut) => {
                Err(BrokerError::CommitTimeout)
            }
            Err(e) => Err(BrokerError::Kafka(e)),
        }
    }
}

#[async_trait]
impl<K, V> BrokerClient<K, V> for RdKafkaBrokerClient<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn subscribe(&self, topics: &HashSet<String>) -> Result<(), BrokerError> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)?;
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<PollBatch<K, V>, BrokerError> {
        let mut records = Vec::new();
        let mut partitions = HashSet::new();

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.consumer.recv()).await {
                Ok(Ok(message)) => {
                    let partition = PartitionId::new(message.topic(), message.partition());
                    let key = (self.key_deserializer)(message.key()).map_err(BrokerError::Deserialize)?;
                    let value = (self.value_deserializer)(message.payload()).map_err(BrokerError::Deserialize)?;
                    let headers = message
                        .headers()
                        .map(|hdrs| {
                            hdrs.iter()
                                .filter_map(|h| h.value.map(|v| (h.key.to_string(), v.to_vec())))
                                .collect()
                        })
                        .unwrap_or_default();

                    partitions.insert(partition.clone());
                    records.push(Record {
                        partition,
                        offset: message.offset(),
                        key,
                        value,
                        timestamp: message.timestamp().to_millis().unwrap_or(0),
                        headers,
                    });
                }
                Ok(Err(e)) => return Err(BrokerError::Kafka(e)),
                Err(_elapsed) => break,
            }
        }

        Ok(PollBatch { records, partitions })
    }

    async fn pause(&self, partitions: &HashSet<PartitionId>) -> Result<(), BrokerError> {
        let tpl = partition_list(partitions);
        self.consumer.pause(&tpl)?;
        Ok(())
    }

    async fn resume(&self, partitions: &HashSet<PartitionId>) -> Result<(), BrokerError> {
        let tpl = partition_list(partitions);
        self.consumer.resume(&tpl)?;
        Ok(())
    }

    fn assignment(&self) -> Result<HashSet<PartitionId>, BrokerError> {
        let tpl = self.consumer.assignment()?;
        Ok(tpl
            .elements()
            .iter()
            .map(|e| PartitionId::new(e.topic(), e.partition()))
            .collect())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        // StreamConsumer has no explicit async close; dropping it leaves
        // the group, which rdkafka handles on Drop.
        Ok(())
    }
}

fn partition_list(partitions: &HashSet<PartitionId>) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    for p in partitions {
        tpl.add_partition(&p.topic, p.partition);
    }
    tpl
}
