//! Batch Dispatcher (C4): splits a [`PollBatch`] into [`ProcessUnit`]s.
//!
//! Pure: the same batch dispatched with the same strategy always produces
//! the same units, in the same order.

use std::collections::{BTreeMap, HashSet};

use crate::record::{PartitionId, PollBatch, ProcessUnit, Strategy};

/// Splits `batch` into units according to `strategy`.
pub fn split_batch<K, V>(batch: PollBatch<K, V>, strategy: Strategy) -> Vec<ProcessUnit<K, V>> {
    match strategy {
        Strategy::OnePerPartition => split_one_per_partition(batch),
        Strategy::All => split_all(batch),
    }
}

fn split_one_per_partition<K, V>(batch: PollBatch<K, V>) -> Vec<ProcessUnit<K, V>> {
    let all_partitions = batch.partitions.clone();

    // BTreeMap gives a stable, deterministic iteration order over the
    // partition set; records are pushed in the batch's original (broker)
    // order, so each bucket stays in offset order.
    let mut by_partition: BTreeMap<PartitionId, Vec<_>> = BTreeMap::new();
    for partition in &batch.partitions {
        by_partition.entry(partition.clone()).or_default();
    }
    for record in batch.records {
        by_partition
            .entry(record.partition.clone())
            .or_default()
            .push(record);
    }

    by_partition
        .into_iter()
        .enumerate()
        .map(|(index, (partition, records))| ProcessUnit {
            index,
            current_partition: partition,
            all_partitions: all_partitions.clone(),
            records,
        })
        .collect()
}

fn split_all<K, V>(batch: PollBatch<K, V>) -> Vec<ProcessUnit<K, V>> {
    let current_partition = lexicographically_smallest(&batch.partitions);
    vec![ProcessUnit {
        index: 0,
        current_partition,
        all_partitions: batch.partitions,
        records: batch.records,
    }]
}

fn lexicographically_smallest(partitions: &HashSet<PartitionId>) -> PartitionId {
    partitions
        .iter()
        .min()
        .cloned()
        .unwrap_or_else(|| PartitionId::new("", 0))
}
