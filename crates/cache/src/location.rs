//! Bidirectional physical/logical location index.
//!
//! - forward: `(table, location) -> seq`
//! - reverse: `(table, group, seq) -> location`
//!
//! Each direction is its own bounded LRU cache with its own lock. Reverse
//! hits are advisory: rows can move, so the consumer re-reads the row at the
//! returned location, checks it still carries the expected sequence and
//! falls back (and repopulates) when it does not.
use std::fmt;

use grouphash::{GroupHash, Seq, TableId};
use parking_lot::RwLock;

use crate::lru::BoundedCache;
use crate::stats::CacheStats;

/// Opaque handle to a row's physical storage.
///
/// The caches never interpret it; only the row-storage layer that issued it
/// does.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location(u64);

impl Location {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location({:#x})", self.0)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ForwardKey {
    table: TableId,
    location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ReverseKey {
    table: TableId,
    group: GroupHash,
    seq: Seq,
}

/// Counters of both index directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocationStats {
    pub forward: CacheStats,
    pub reverse: CacheStats,
}

/// Physical-to-logical and logical-to-physical lookup caches.
#[derive(Debug)]
pub struct LocationIndex {
    forward: RwLock<BoundedCache<ForwardKey, Seq>>,
    reverse: RwLock<BoundedCache<ReverseKey, Location>>,
}

impl LocationIndex {
    /// Creates both directions with `capacity` entries each.
    pub fn new(capacity: usize) -> Self {
        Self {
            forward: RwLock::new(BoundedCache::new(capacity)),
            reverse: RwLock::new(BoundedCache::new(capacity)),
        }
    }

    /// Sizes the index from a MiB budget shared by both directions.
    pub fn with_budget_mb(mb: usize) -> Self {
        Self::new(config::capacity_for_budget(mb, Self::entry_footprint()))
    }

    /// Estimated bytes to index one row in both directions.
    #[must_use]
    pub fn entry_footprint() -> usize {
        BoundedCache::<ForwardKey, Seq>::entry_footprint()
            + BoundedCache::<ReverseKey, Location>::entry_footprint()
    }

    /// Records that the row `(group, seq)` of `table` lives at `location`.
    pub fn record(&self, table: TableId, location: Location, group: GroupHash, seq: Seq) {
        self.forward
            .write()
            .insert(ForwardKey { table, location }, seq);
        self.reverse
            .write()
            .insert(ReverseKey { table, group, seq }, location);
    }

    /// Sequence of the row stored at `location`, if cached.
    pub fn seq_at(&self, table: TableId, location: Location) -> Option<Seq> {
        self.forward
            .write()
            .get(&ForwardKey { table, location })
            .copied()
    }

    /// Cached location of `(group, seq)`. The caller must verify it.
    pub fn location_of(&self, table: TableId, group: GroupHash, seq: Seq) -> Option<Location> {
        self.reverse
            .write()
            .get(&ReverseKey { table, group, seq })
            .copied()
    }

    /// Drops a stale reverse entry after failed verification.
    pub fn forget_reverse(&self, table: TableId, group: GroupHash, seq: Seq) {
        self.reverse.write().remove(&ReverseKey { table, group, seq });
    }

    /// Drops a stale forward entry.
    pub fn forget_forward(&self, table: TableId, location: Location) {
        self.forward.write().remove(&ForwardKey { table, location });
    }

    /// Drops every entry of `table` from both directions. Returns the number
    /// removed.
    pub fn invalidate(&self, table: TableId) -> usize {
        let mut forward = self.forward.write();
        let mut reverse = self.reverse.write();
        forward.retain(|k, _| k.table != table) + reverse.retain(|k, _| k.table != table)
    }

    pub fn stats(&self) -> LocationStats {
        LocationStats {
            forward: self.forward.read().stats(),
            reverse: self.reverse.read().stats(),
        }
    }
}
