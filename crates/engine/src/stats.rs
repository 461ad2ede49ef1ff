//! Per-group statistics and transaction-scoped batching.
//!
//! Every insert updates a [`GroupStats`] record for its `(table, group)`.
//! Inside a [`Transaction`] those updates collect in a private
//! [`StatsAccumulator`] and reach the shared table once, at commit. An
//! aborted (or dropped) transaction discards them.
use std::collections::HashMap;

use anyhow::Result;
use grouphash::{GroupHash, KeyValue, Seq, TableId};
use parking_lot::RwLock;
use tracing::debug;

use crate::write::InsertOutcome;
use crate::DeltaStore;

/// Running totals of one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    pub rows: u64,
    pub keyframes: u64,
    pub raw_bytes: u64,
    pub stored_bytes: u64,
    pub max_seq: Seq,
}

impl GroupStats {
    fn add(&mut self, outcome: &InsertOutcome) {
        self.rows += 1;
        self.keyframes += outcome.keyframes() as u64;
        self.raw_bytes += outcome.raw_bytes as u64;
        self.stored_bytes += outcome.stored_bytes as u64;
        self.max_seq = self.max_seq.max(outcome.seq);
    }

    fn merge(&mut self, other: &GroupStats) {
        self.rows += other.rows;
        self.keyframes += other.keyframes;
        self.raw_bytes += other.raw_bytes;
        self.stored_bytes += other.stored_bytes;
        self.max_seq = self.max_seq.max(other.max_seq);
    }

    /// Stored size relative to raw size, `1.0` for an empty group.
    pub fn ratio(&self) -> f64 {
        if self.raw_bytes == 0 {
            1.0
        } else {
            self.stored_bytes as f64 / self.raw_bytes as f64
        }
    }
}

/// Private buffer of not-yet-flushed updates.
#[derive(Debug, Default)]
pub struct StatsAccumulator {
    pending: HashMap<(TableId, GroupHash), GroupStats>,
}

impl StatsAccumulator {
    pub fn record(&mut self, table: TableId, outcome: &InsertOutcome) {
        self.pending
            .entry((table, outcome.group))
            .or_default()
            .add(outcome);
    }

    /// Number of distinct groups touched.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self, table: TableId, group: GroupHash) -> Option<&GroupStats> {
        self.pending.get(&(table, group))
    }

    fn drain(&mut self) -> impl Iterator<Item = ((TableId, GroupHash), GroupStats)> + '_ {
        self.pending.drain()
    }
}

/// Flushed statistics shared by every transaction of a store.
#[derive(Debug, Default)]
pub(crate) struct StatsTable {
    groups: RwLock<HashMap<(TableId, GroupHash), GroupStats>>,
}

impl StatsTable {
    pub(crate) fn apply_one(&self, table: TableId, outcome: &InsertOutcome) {
        self.groups
            .write()
            .entry((table, outcome.group))
            .or_default()
            .add(outcome);
    }

    /// Applies a whole accumulator under one lock acquisition.
    fn flush(&self, acc: &mut StatsAccumulator) -> usize {
        let mut groups = self.groups.write();
        let mut flushed = 0;
        for (key, delta) in acc.drain() {
            groups.entry(key).or_default().merge(&delta);
            flushed += 1;
        }
        flushed
    }

    fn get(&self, table: TableId, group: GroupHash) -> Option<GroupStats> {
        self.groups.read().get(&(table, group)).copied()
    }

    pub(crate) fn forget_table(&self, table: TableId) {
        self.groups.write().retain(|(t, _), _| *t != table);
    }
}

/// A batch of inserts whose statistics are published together.
///
/// Rows are appended as each insert runs; only the statistics wait for
/// [`commit`](Transaction::commit).
#[derive(Debug)]
pub struct Transaction<'a> {
    store: &'a DeltaStore,
    acc: StatsAccumulator,
    done: bool,
}

impl<'a> Transaction<'a> {
    pub fn insert(
        &mut self,
        table: TableId,
        key: &KeyValue,
        columns: Vec<Vec<u8>>,
    ) -> Result<InsertOutcome> {
        let outcome = self.store.insert_row(table, key, columns)?;
        self.acc.record(table, &outcome);
        Ok(outcome)
    }

    /// Statistics gathered so far but not yet visible to the store.
    pub fn accumulator(&self) -> &StatsAccumulator {
        &self.acc
    }

    /// Publishes the accumulated statistics. Returns the number of groups
    /// updated.
    pub fn commit(mut self) -> usize {
        self.done = true;
        self.store.stats.flush(&mut self.acc)
    }

    /// Discards the accumulated statistics.
    pub fn abort(mut self) {
        self.done = true;
        debug!(groups = self.acc.len(), "transaction aborted; statistics discarded");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.done && !self.acc.is_empty() {
            debug!(groups = self.acc.len(), "transaction dropped without commit");
        }
    }
}

impl DeltaStore {
    /// Starts a transaction on this store.
    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            acc: StatsAccumulator::default(),
            done: false,
        }
    }

    /// Committed statistics of `key` in `table`.
    pub fn group_stats(&self, table: TableId, key: &KeyValue) -> Result<Option<GroupStats>> {
        let group = self.group_hash(key)?;
        Ok(self.stats.get(table, group))
    }
}
