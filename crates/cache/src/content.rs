//! Decoded content cache.
//!
//! Holds reconstructed column values keyed by `(table, group, seq, column)`
//! so that walking a delta chain, or fetching a diff base, costs one lookup
//! once a version has been decoded or encoded. Content is immutable once
//! written, so the only invalidation is per table on truncate/drop.
//!
//! The cache is bounded twice: by entry count and by resident bytes. A value
//! larger than the per-entry ceiling is rejected outright and counted.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use grouphash::{GroupHash, Seq, TableId};
use parking_lot::RwLock;

use crate::diag::LogOnce;
use crate::lru::{BoundedCache, InsertOutcome};
use crate::stats::CacheStats;
use crate::warn_once;

static OVERSIZED: LogOnce = LogOnce::new();

/// Average payload assumed when turning the MiB budget into an entry count.
const ASSUMED_VALUE_BYTES: usize = 256;

/// Key of one decoded column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentKey {
    pub table: TableId,
    pub group: GroupHash,
    pub seq: Seq,
    pub column: u16,
}

impl ContentKey {
    pub const fn new(table: TableId, group: GroupHash, seq: Seq, column: u16) -> Self {
        Self {
            table,
            group,
            seq,
            column,
        }
    }
}

/// Counters of the content cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentStats {
    pub cache: CacheStats,
    pub resident_bytes: usize,
    pub byte_budget: usize,
    pub max_entry_bytes: usize,
    /// Puts refused because the value exceeded the per-entry ceiling.
    pub oversized_rejections: u64,
}

struct Inner {
    map: BoundedCache<ContentKey, Arc<[u8]>>,
    resident_bytes: usize,
}

/// LRU cache of decoded column content.
pub struct ContentCache {
    inner: RwLock<Inner>,
    byte_budget: usize,
    max_entry_bytes: usize,
    oversized: AtomicU64,
}

impl ContentCache {
    /// Creates a cache of at most `capacity` entries and `byte_budget`
    /// resident bytes, refusing values larger than `max_entry_bytes`.
    pub fn new(capacity: usize, byte_budget: usize, max_entry_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                map: BoundedCache::new(capacity),
                resident_bytes: 0,
            }),
            byte_budget,
            max_entry_bytes,
            oversized: AtomicU64::new(0),
        }
    }

    /// Sizes the cache from a MiB budget.
    pub fn with_budget_mb(mb: usize, max_entry_bytes: usize) -> Self {
        let footprint =
            BoundedCache::<ContentKey, Arc<[u8]>>::entry_footprint() + ASSUMED_VALUE_BYTES;
        Self::new(
            config::capacity_for_budget(mb, footprint),
            mb.saturating_mul(1024 * 1024),
            max_entry_bytes,
        )
    }

    /// Returns the cached value, promoting it to most-recently-used.
    pub fn get(&self, key: &ContentKey) -> Option<Arc<[u8]>> {
        self.inner.write().map.get(key).cloned()
    }

    /// Caches `value` under `key`. Returns `false` if it was not cached.
    ///
    /// Values above the per-entry ceiling bump the oversized counter (once per
    /// rejected put) and are never retrievable afterwards.
    pub fn put(&self, key: ContentKey, value: Arc<[u8]>) -> bool {
        let len = value.len();
        let mut inner = self.inner.write();
        if inner.map.capacity() == 0 {
            return false;
        }
        if len > self.max_entry_bytes || len > self.byte_budget {
            drop(inner);
            self.oversized.fetch_add(1, Ordering::Relaxed);
            warn_once!(
                OVERSIZED,
                len,
                max_entry_bytes = self.max_entry_bytes,
                "content value exceeds cache entry ceiling; not cached"
            );
            return false;
        }

        if let Some(old) = inner.map.remove(&key) {
            inner.resident_bytes -= old.len();
        }
        while inner.resident_bytes + len > self.byte_budget {
            match inner.map.pop_lru() {
                Some((_, evicted)) => inner.resident_bytes -= evicted.len(),
                None => break,
            }
        }

        match inner.map.insert(key, value) {
            InsertOutcome::Inserted => {}
            InsertOutcome::Evicted(_, evicted) => inner.resident_bytes -= evicted.len(),
            InsertOutcome::Replaced(old) => inner.resident_bytes -= old.len(),
            InsertOutcome::Rejected => return false,
        }
        inner.resident_bytes += len;
        true
    }

    /// Drops every value of `table`. Returns the number removed.
    pub fn invalidate(&self, table: TableId) -> usize {
        let mut inner = self.inner.write();
        let mut freed = 0usize;
        let removed = inner.map.retain(|k, v| {
            if k.table == table {
                freed += v.len();
                false
            } else {
                true
            }
        });
        inner.resident_bytes -= freed;
        removed
    }

    pub fn stats(&self) -> ContentStats {
        let inner = self.inner.read();
        ContentStats {
            cache: inner.map.stats(),
            resident_bytes: inner.resident_bytes,
            byte_budget: self.byte_budget,
            max_entry_bytes: self.max_entry_bytes,
            oversized_rejections: self.oversized.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ContentCache")
            .field("live_entries", &stats.cache.live_entries)
            .field("resident_bytes", &stats.resident_bytes)
            .field("byte_budget", &stats.byte_budget)
            .finish()
    }
}
