//! Per-group sequence allocator.
//!
//! Caches the highest sequence number handed out for each `(table, group)`
//! so the insert path can allocate the next version without scanning the
//! table. The cache is advisory: an absent key yields the `0` sentinel and
//! the caller must resolve the true maximum from storage and [`set`] it.
//!
//! [`set`]: SequenceAllocator::set
use grouphash::{GroupHash, Seq, TableId};
use parking_lot::RwLock;

use crate::diag::LogOnce;
use crate::lru::{BoundedCache, InsertOutcome};
use crate::stats::CacheStats;
use crate::warn_once;

static SATURATED: LogOnce = LogOnce::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SeqKey {
    table: TableId,
    group: GroupHash,
}

/// Bounded LRU map from `(table, group)` to the last allocated sequence.
#[derive(Debug)]
pub struct SequenceAllocator {
    map: RwLock<BoundedCache<SeqKey, Seq>>,
}

impl SequenceAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: RwLock::new(BoundedCache::new(capacity)),
        }
    }

    /// Sizes the allocator from a MiB budget.
    pub fn with_budget_mb(mb: usize) -> Self {
        Self::new(config::capacity_for_budget(
            mb,
            BoundedCache::<SeqKey, Seq>::entry_footprint(),
        ))
    }

    /// Returns the last allocated sequence, or `None` on a cache miss.
    pub fn get(&self, table: TableId, group: GroupHash) -> Option<Seq> {
        self.map.write().get(&SeqKey { table, group }).copied()
    }

    /// Records `seq` as the last allocated sequence (upsert).
    ///
    /// When the cache cannot take the entry the write is dropped; the next
    /// [`next`](Self::next) then misses and the caller rescans.
    pub fn set(&self, table: TableId, group: GroupHash, seq: Seq) {
        let mut map = self.map.write();
        insert(&mut map, SeqKey { table, group }, seq);
    }

    /// Records `seq` unless the cached value is already at least `seq`.
    ///
    /// Readers seed the allocator with this. A maximum they read from storage
    /// before a concurrent allocation never lowers the cached value.
    pub fn raise(&self, table: TableId, group: GroupHash, seq: Seq) {
        let mut map = self.map.write();
        let key = SeqKey { table, group };
        if let Some(cached) = map.get_mut(&key) {
            *cached = (*cached).max(seq);
            return;
        }
        insert(&mut map, key, seq);
    }

    /// Allocates the sequence after `max`, the stored maximum a caller read
    /// after [`next`](Self::next) missed.
    ///
    /// If the key was seeded in the meantime, allocation continues from the
    /// larger of the two values.
    pub fn allocate_after(&self, table: TableId, group: GroupHash, max: Seq) -> Seq {
        let mut map = self.map.write();
        let key = SeqKey { table, group };
        if let Some(cached) = map.get_mut(&key) {
            *cached = (*cached).max(max) + 1;
            return *cached;
        }
        insert(&mut map, key, max + 1);
        max + 1
    }

    /// Increments and returns the sequence for `(table, group)`.
    ///
    /// Returns `0` if the key is not cached. The caller must then determine
    /// the authoritative maximum and call [`set`](Self::set); numbering never
    /// silently restarts at 1 after an eviction.
    pub fn next(&self, table: TableId, group: GroupHash) -> Seq {
        let mut map = self.map.write();
        match map.get_mut(&SeqKey { table, group }) {
            Some(seq) => {
                *seq += 1;
                *seq
            }
            None => 0,
        }
    }

    /// Undoes a failed allocation.
    ///
    /// Decrements only if the current value still equals `expected`, so a
    /// concurrent successful allocation is never clobbered. Returns whether
    /// the rollback happened.
    pub fn rollback(&self, table: TableId, group: GroupHash, expected: Seq) -> bool {
        let mut map = self.map.write();
        match map.get_mut(&SeqKey { table, group }) {
            Some(seq) if *seq == expected && expected > 0 => {
                *seq -= 1;
                true
            }
            _ => false,
        }
    }

    /// Drops every entry of `table`. Returns the number removed.
    pub fn invalidate(&self, table: TableId) -> usize {
        self.map.write().retain(|k, _| k.table != table)
    }

    pub fn stats(&self) -> CacheStats {
        self.map.read().stats()
    }
}

/// When the cache cannot take the entry the write is dropped.
fn insert(map: &mut BoundedCache<SeqKey, Seq>, key: SeqKey, seq: Seq) {
    if matches!(map.insert(key, seq), InsertOutcome::Rejected) {
        warn_once!(
            SATURATED,
            table = key.table,
            group = %key.group,
            "sequence cache saturated; allocations fall back to table scans"
        );
    }
}
