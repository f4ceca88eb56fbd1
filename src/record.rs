use std::collections::{HashMap, HashSet};

/// A broker-assigned partition identity: a topic plus a partition number.
///
/// Ordered lexicographically by `(topic, partition)` so that dispatch can
/// pick a deterministic "first" partition without consulting broker metadata.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId {
    pub topic: String,
    pub partition: i32,
}

impl PartitionId {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

/// An immutable record as delivered by the broker.
#[derive(Debug, Clone)]
pub struct Record<K, V> {
    pub partition: PartitionId,
    pub offset: i64,
    pub key: K,
    pub value: V,
    pub timestamp: i64,
    pub headers: HashMap<String, Vec<u8>>,
}

/// The output of a single poll, consumed exactly once by the dispatcher.
#[derive(Debug, Clone)]
pub struct PollBatch<K, V> {
    pub records: Vec<Record<K, V>>,
    pub partitions: HashSet<PartitionId>,
}

impl<K, V> PollBatch<K, V> {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// The dispatch strategy controlling how a [`PollBatch`] is split into
/// [`ProcessUnit`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    OnePerPartition,
    All,
}

/// The smallest indivisible quantum handed to the user's [`crate::Processor`].
#[derive(Debug, Clone)]
pub struct ProcessUnit<K, V> {
    pub index: usize,
    pub current_partition: PartitionId,
    pub all_partitions: HashSet<PartitionId>,
    pub records: Vec<Record<K, V>>,
}

/// Returned by the user handler on success. `id` is opaque to the core and
/// only surfaced to hooks; `records` is advisory and not used for commit
/// offset computation (the invoker always commits based on the unit it
/// dispatched, not on what the handler reports back).
#[derive(Debug, Clone)]
pub struct ProcessResult<K, V> {
    pub id: uuid::Uuid,
    pub records: Vec<Record<K, V>>,
}

impl<K, V> ProcessResult<K, V> {
    pub fn new(records: Vec<Record<K, V>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            records,
        }
    }
}

/// Computes the next-offsets commit map for a set of records: for each
/// partition present, `max(offset) + 1`.
pub fn next_offsets<K, V>(records: &[Record<K, V>]) -> HashMap<PartitionId, i64> {
    let mut offsets: HashMap<PartitionId, i64> = HashMap::new();
    for record in records {
        offsets
            .entry(record.partition.clone())
            .and_modify(|o| *o = (*o).max(record.offset + 1))
            .or_insert(record.offset + 1);
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(partition: i32, offset: i64) -> Record<String, String> {
        Record {
            partition: PartitionId::new("t", partition),
            offset,
            key: "k".to_string(),
            value: "v".to_string(),
            timestamp: 0,
            headers: HashMap::new(),
        }
    }

    #[test]
    fn next_offsets_takes_max_per_partition() {
        let records = vec![rec(0, 5), rec(0, 7), rec(1, 2)];
        let offsets = next_offsets(&records);
        assert_eq!(offsets.get(&PartitionId::new("t", 0)), Some(&8));
        assert_eq!(offsets.get(&PartitionId::new("t", 1)), Some(&3));
    }

    #[test]
    fn partition_id_orders_by_topic_then_partition() {
        let mut ids = vec![
            PartitionId::new("b", 0),
            PartitionId::new("a", 1),
            PartitionId::new("a", 0),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                PartitionId::new("a", 0),
                PartitionId::new("a", 1),
                PartitionId::new("b", 0),
            ]
        );
    }
}
