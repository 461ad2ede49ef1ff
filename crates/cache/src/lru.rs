//! Bounded open-addressing hash cache with an intrusive LRU list.
//!
//! All three DeltaChain caches share this skeleton:
//!
//! ```text
//! buckets: [Empty | Tombstone | Occupied(slot)]   power of two, >= 2 x capacity
//!              |                        |
//!              |  linear probing        v
//! slots:   [Free{next_free} | Live{key, value, bucket, prev, next}]
//!                                 ^                        |
//!                        head (LRU) <-> ... <-> tail (MRU)
//! ```
//!
//! Links are slot indices, not pointers, and freed slots are recycled through
//! an index-linked free list. A removed entry leaves a tombstone in its
//! bucket so keys that probed past it are still found; tombstones are
//! reclaimed by inserts and by an in-place rebuild once they exceed a quarter
//! of the buckets.
use std::hash::{BuildHasher, Hash};

use xxhash_rust::xxh3::Xxh3Builder;

use crate::stats::CacheStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bucket {
    Empty,
    Tombstone,
    Occupied(u32),
}

struct Entry<K, V> {
    key: K,
    value: V,
    /// Back-pointer to the bucket holding this slot index.
    bucket: u32,
    prev: Option<u32>,
    next: Option<u32>,
}

enum Slot<K, V> {
    Free { next_free: Option<u32> },
    Live(Entry<K, V>),
}

/// Result of [`BoundedCache::insert`].
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome<K, V> {
    /// New entry stored without displacing anything.
    Inserted,
    /// Key was present; its previous value is returned.
    Replaced(V),
    /// New entry stored after evicting the least-recently-used entry.
    Evicted(K, V),
    /// Nothing stored (zero capacity or no free bucket).
    Rejected,
}

/// Fixed-capacity hash cache with least-recently-used eviction.
///
/// Not internally synchronized; the typed caches wrap it in a
/// `parking_lot::RwLock`.
pub struct BoundedCache<K, V, S = Xxh3Builder> {
    buckets: Vec<Bucket>,
    slots: Vec<Slot<K, V>>,
    free_head: Option<u32>,
    /// Least recently used.
    head: Option<u32>,
    /// Most recently used.
    tail: Option<u32>,
    capacity: usize,
    len: usize,
    tombstones: usize,
    hasher: S,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Hash + Eq, V> BoundedCache<K, V, Xxh3Builder> {
    /// Creates a cache holding at most `capacity` entries. A capacity of zero
    /// creates a disabled cache that rejects every insert.
    pub fn new(capacity: usize) -> Self {
        Self::with_hasher(capacity, Xxh3Builder::new())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> BoundedCache<K, V, S> {
    pub fn with_hasher(capacity: usize, hasher: S) -> Self {
        let capacity = capacity.min(u32::MAX as usize / 4);
        let bucket_count = if capacity == 0 {
            0
        } else {
            (capacity * 2).next_power_of_two().max(8)
        };
        Self {
            buckets: vec![Bucket::Empty; bucket_count],
            slots: Vec::new(),
            free_head: None,
            head: None,
            tail: None,
            capacity,
            len: 0,
            tombstones: 0,
            hasher,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Estimated bytes per entry, used to turn a memory budget into a
    /// capacity.
    #[must_use]
    pub fn entry_footprint() -> usize {
        std::mem::size_of::<Slot<K, V>>() + 2 * std::mem::size_of::<Bucket>()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Looks up `key`, promoting it to most-recently-used on a hit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.get_mut(key).map(|v| &*v)
    }

    /// Mutable lookup, promoting `key` to most-recently-used on a hit.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        match self.find(key) {
            Some(idx) => {
                self.hits += 1;
                self.move_to_back(idx);
                match &mut self.slots[idx as usize] {
                    Slot::Live(entry) => Some(&mut entry.value),
                    Slot::Free { .. } => None,
                }
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Looks up `key` without touching LRU order or hit counters.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.find(key).and_then(|idx| match &self.slots[idx as usize] {
            Slot::Live(entry) => Some(&entry.value),
            Slot::Free { .. } => None,
        })
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Inserts or replaces `key`, making it most-recently-used.
    ///
    /// When the cache is full the least-recently-used entry is evicted
    /// first. If no bucket can be claimed the write is dropped and
    /// [`InsertOutcome::Rejected`] is returned.
    pub fn insert(&mut self, key: K, value: V) -> InsertOutcome<K, V> {
        if self.capacity == 0 {
            return InsertOutcome::Rejected;
        }

        if let Some(idx) = self.find(&key) {
            self.move_to_back(idx);
            if let Slot::Live(entry) = &mut self.slots[idx as usize] {
                return InsertOutcome::Replaced(std::mem::replace(&mut entry.value, value));
            }
        }

        let evicted = if self.len >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let Some(bucket) = self.claim_bucket(&key) else {
            return InsertOutcome::Rejected;
        };
        let Some(idx) = self.alloc_slot(Entry {
            key,
            value,
            bucket: bucket as u32,
            prev: None,
            next: None,
        }) else {
            return InsertOutcome::Rejected;
        };

        if self.buckets[bucket] == Bucket::Tombstone {
            self.tombstones -= 1;
        }
        self.buckets[bucket] = Bucket::Occupied(idx);
        self.push_back(idx);
        self.len += 1;

        match evicted {
            Some((k, v)) => InsertOutcome::Evicted(k, v),
            None => InsertOutcome::Inserted,
        }
    }

    /// Removes `key`, leaving a tombstone in its bucket.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.find(key)?;
        Some(self.remove_slot(idx).1)
    }

    /// Evicts the least-recently-used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let head = self.head?;
        self.evictions += 1;
        Some(self.remove_slot(head))
    }

    /// Keeps only the entries for which `keep` returns `true`. Returns the
    /// number of removed entries.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let doomed: Vec<u32> = self
            .iter_lru()
            .filter(|(_, k, v)| !keep(k, v))
            .map(|(idx, _, _)| idx)
            .collect();
        for idx in &doomed {
            self.remove_slot(*idx);
        }
        doomed.len()
    }

    /// Removes every entry and resets the table to all-empty buckets.
    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = Bucket::Empty);
        self.slots.clear();
        self.free_head = None;
        self.head = None;
        self.tail = None;
        self.len = 0;
        self.tombstones = 0;
    }

    /// Keys from least to most recently used.
    pub fn keys_lru(&self) -> impl Iterator<Item = &K> {
        self.iter_lru().map(|(_, k, _)| k)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.capacity,
            live_entries: self.len,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }

    #[must_use]
    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    pub(crate) fn home_bucket(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) as usize) & (self.buckets.len() - 1)
    }

    pub(crate) fn bucket_state(&self, bucket: usize) -> Bucket {
        self.buckets[bucket]
    }

    // ---- Internal helpers ----

    fn iter_lru(&self) -> LruIter<'_, K, V> {
        LruIter {
            slots: &self.slots,
            current: self.head,
        }
    }

    fn find(&self, key: &K) -> Option<u32> {
        if self.buckets.is_empty() {
            return None;
        }
        let mask = self.buckets.len() - 1;
        let mut pos = self.home_bucket(key);
        for _ in 0..self.buckets.len() {
            match self.buckets[pos] {
                Bucket::Empty => return None,
                Bucket::Tombstone => {}
                Bucket::Occupied(idx) => {
                    if let Slot::Live(entry) = &self.slots[idx as usize] {
                        if entry.key == *key {
                            return Some(idx);
                        }
                    }
                }
            }
            pos = (pos + 1) & mask;
        }
        None
    }

    /// First empty or tombstoned bucket on the probe path of `key`.
    fn claim_bucket(&self, key: &K) -> Option<usize> {
        let mask = self.buckets.len() - 1;
        let mut pos = self.home_bucket(key);
        for _ in 0..self.buckets.len() {
            if !matches!(self.buckets[pos], Bucket::Occupied(_)) {
                return Some(pos);
            }
            pos = (pos + 1) & mask;
        }
        None
    }

    fn alloc_slot(&mut self, entry: Entry<K, V>) -> Option<u32> {
        if let Some(free) = self.free_head {
            if let Slot::Free { next_free } = self.slots[free as usize] {
                self.free_head = next_free;
            }
            self.slots[free as usize] = Slot::Live(entry);
            return Some(free);
        }
        if self.slots.len() >= self.capacity {
            return None;
        }
        let idx = self.slots.len() as u32;
        self.slots.push(Slot::Live(entry));
        Some(idx)
    }

    fn remove_slot(&mut self, idx: u32) -> (K, V) {
        self.unlink(idx);
        let slot = std::mem::replace(
            &mut self.slots[idx as usize],
            Slot::Free {
                next_free: self.free_head,
            },
        );
        self.free_head = Some(idx);
        self.len -= 1;

        let Slot::Live(entry) = slot else {
            unreachable!("linked slot {idx} is free");
        };
        self.buckets[entry.bucket as usize] = Bucket::Tombstone;
        self.tombstones += 1;
        if self.tombstones > self.buckets.len() / 4 {
            self.rebuild();
        }
        (entry.key, entry.value)
    }

    /// Re-seats every live entry into a tombstone-free bucket array. Slot
    /// indices (and therefore LRU links) are unchanged.
    fn rebuild(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = Bucket::Empty);
        self.tombstones = 0;
        let mask = self.buckets.len() - 1;
        for idx in 0..self.slots.len() {
            let home = match &self.slots[idx] {
                Slot::Live(entry) => self.home_bucket(&entry.key),
                Slot::Free { .. } => continue,
            };
            let mut pos = home;
            while self.buckets[pos] != Bucket::Empty {
                pos = (pos + 1) & mask;
            }
            self.buckets[pos] = Bucket::Occupied(idx as u32);
            if let Slot::Live(entry) = &mut self.slots[idx] {
                entry.bucket = pos as u32;
            }
        }
    }

    fn entry_mut(&mut self, idx: u32) -> &mut Entry<K, V> {
        match &mut self.slots[idx as usize] {
            Slot::Live(entry) => entry,
            Slot::Free { .. } => unreachable!("dangling slot index {idx}"),
        }
    }

    fn unlink(&mut self, idx: u32) {
        let (prev, next) = {
            let e = self.entry_mut(idx);
            (e.prev.take(), e.next.take())
        };
        match prev {
            Some(p) => self.entry_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entry_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_back(&mut self, idx: u32) {
        let old_tail = self.tail;
        {
            let e = self.entry_mut(idx);
            e.prev = old_tail;
            e.next = None;
        }
        match old_tail {
            Some(t) => self.entry_mut(t).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn move_to_back(&mut self, idx: u32) {
        if self.tail == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_back(idx);
    }
}

struct LruIter<'a, K, V> {
    slots: &'a [Slot<K, V>],
    current: Option<u32>,
}

impl<'a, K, V> Iterator for LruIter<'a, K, V> {
    type Item = (u32, &'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.current?;
        match &self.slots[idx as usize] {
            Slot::Live(entry) => {
                self.current = entry.next;
                Some((idx, &entry.key, &entry.value))
            }
            Slot::Free { .. } => None,
        }
    }
}

impl<K, V, S> std::fmt::Debug for BoundedCache<K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .field("buckets", &self.buckets.len())
            .field("tombstones", &self.tombstones)
            .finish()
    }
}
