//! # Staging - Insert Staging Buffer
//!
//! Keeps the raw content of the most recent `depth` versions of a group so
//! the insert path can diff a new version against its predecessors without
//! reconstructing them from delta chains.
//!
//! ## Layout
//!
//! ```text
//! directory (fixed count)            arena (grows on demand)
//! +---------------------------+      +--------------------------------+
//! | owner (table, group)      |      | seqs      [depth]              |
//! | epoch, depth, cols        | ---> | committed [depth]              |
//! | cursor, valid, last_active|      | content   [depth x cols]       |
//! +---------------------------+      +--------------------------------+
//! ```
//!
//! Each slot is a ring: [`push`] fills the columns of the row at the write
//! cursor, [`commit`] seals it and advances the cursor, overwriting the oldest
//! row once `depth` rows are held.
//!
//! ## Ownership
//!
//! [`acquire`] hands out a [`SlotToken`] naming the claiming table, group and
//! claim epoch. When the directory is full the least-recently-active slot is
//! taken from its owner, so every later call checks its token first. A stale
//! token turns the call into a no-op (or an empty result), bumps the
//! `ownership_mismatches` counter and logs once per process; the caller falls
//! back to chain reconstruction.
//!
//! [`push`]: InsertStagingBuffer::push
//! [`commit`]: InsertStagingBuffer::commit
//! [`acquire`]: InsertStagingBuffer::acquire
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cache::{warn_once, LogOnce};
use grouphash::{GroupHash, Seq, TableId};
use parking_lot::RwLock;
use tracing::debug;

mod arena;

use arena::{Arena, RegionHandle};

static STOLEN_SLOT: LogOnce = LogOnce::new();

/// Proof of a claim on a staging slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotToken {
    slot: u32,
    table: TableId,
    group: GroupHash,
    epoch: u64,
}

impl SlotToken {
    pub fn slot(&self) -> usize {
        self.slot as usize
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn group(&self) -> GroupHash {
        self.group
    }
}

/// A staged predecessor usable as a diff base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentBase {
    pub seq: Seq,
    /// Distance back from the target sequence (`1..=depth`).
    pub tag: u16,
    pub bytes: Arc<[u8]>,
}

/// One committed row handed to [`InsertStagingBuffer::populate`].
#[derive(Debug, Clone)]
pub struct StagedRow {
    pub seq: Seq,
    /// One entry per delta column; `None` leaves the cell empty.
    pub columns: Vec<Option<Arc<[u8]>>>,
}

/// Counters exported on the metrics surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingStats {
    pub slots: usize,
    pub claimed: usize,
    pub regions: usize,
    pub evicted_while_owned: u64,
    pub ownership_mismatches: u64,
}

#[derive(Debug, Default)]
struct SlotHeader {
    owner: Option<(TableId, GroupHash)>,
    epoch: u64,
    depth: u16,
    cols: u16,
    cursor: u16,
    valid: u16,
    last_active: u64,
    region: Option<RegionHandle>,
}

#[derive(Debug)]
struct Inner {
    slots: Vec<SlotHeader>,
    owners: HashMap<(TableId, GroupHash), u32>,
    arena: Arena,
    tick: u64,
    next_epoch: u64,
}

impl Inner {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn free_slot(&mut self, slot: usize) {
        let header = &mut self.slots[slot];
        if let Some(owner) = header.owner.take() {
            self.owners.remove(&owner);
        }
        if let Some(region) = header.region.take() {
            self.arena.release(region);
        }
        header.cursor = 0;
        header.valid = 0;
        header.depth = 0;
        header.cols = 0;
    }

    fn is_owner(&self, token: &SlotToken) -> bool {
        self.slots.get(token.slot as usize).is_some_and(|header| {
            header.owner == Some((token.table, token.group)) && header.epoch == token.epoch
        })
    }

    /// Unclaimed slots first, then the least recently active one.
    fn victim(&self) -> usize {
        if let Some(free) = self.slots.iter().position(|h| h.owner.is_none()) {
            return free;
        }
        self.slots
            .iter()
            .enumerate()
            .min_by_key(|(_, h)| h.last_active)
            .map_or(0, |(i, _)| i)
    }
}

/// Fixed-size directory of per-group staging rings.
#[derive(Debug)]
pub struct InsertStagingBuffer {
    inner: RwLock<Inner>,
    evicted_while_owned: AtomicU64,
    ownership_mismatches: AtomicU64,
}

impl InsertStagingBuffer {
    /// Creates a directory of `slots` headers (at least one).
    pub fn new(slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            inner: RwLock::new(Inner {
                slots: (0..slots).map(|_| SlotHeader::default()).collect(),
                owners: HashMap::with_capacity(slots),
                arena: Arena::default(),
                tick: 0,
                next_epoch: 1,
            }),
            evicted_while_owned: AtomicU64::new(0),
            ownership_mismatches: AtomicU64::new(0),
        }
    }

    /// Claims the slot for `(table, group)`.
    ///
    /// Returns the existing slot when the group already holds one with the
    /// same shape (`is_new == false`). Otherwise a slot is claimed, evicting
    /// the least-recently-active owner if the directory is full, and a
    /// `depth x cols` region is allocated for it (`is_new == true`).
    pub fn acquire(
        &self,
        table: TableId,
        group: GroupHash,
        depth: usize,
        cols: usize,
    ) -> (SlotToken, bool) {
        let depth = depth.clamp(1, u16::MAX as usize);
        let cols = cols.min(u16::MAX as usize);
        let mut inner = self.inner.write();
        let tick = inner.touch();

        if let Some(&slot) = inner.owners.get(&(table, group)) {
            let header = &mut inner.slots[slot as usize];
            if header.depth as usize == depth && header.cols as usize == cols {
                header.last_active = tick;
                let token = SlotToken {
                    slot,
                    table,
                    group,
                    epoch: header.epoch,
                };
                return (token, false);
            }
            // Shape changed (table reconfigured): start the ring over.
            inner.free_slot(slot as usize);
        }

        let slot = inner.victim();
        if let Some((old_table, old_group)) = inner.slots[slot].owner {
            self.evicted_while_owned.fetch_add(1, Ordering::Relaxed);
            debug!(
                slot,
                old_table,
                old_group = %old_group,
                table,
                group = %group,
                "staging slot evicted"
            );
        }
        inner.free_slot(slot);

        let region = inner.arena.alloc(depth, cols);
        let epoch = inner.next_epoch;
        inner.next_epoch += 1;
        inner.owners.insert((table, group), slot as u32);
        let header = &mut inner.slots[slot];
        *header = SlotHeader {
            owner: Some((table, group)),
            epoch,
            depth: depth as u16,
            cols: cols as u16,
            cursor: 0,
            valid: 0,
            last_active: tick,
            region: Some(region),
        };
        let token = SlotToken {
            slot: slot as u32,
            table,
            group,
            epoch,
        };
        (token, true)
    }

    /// Writes `bytes` for column `col` of the row being staged at the cursor.
    ///
    /// A different `seq` than the one already at the cursor starts a fresh
    /// row there, dropping whatever occupied that position. Returns `false`
    /// if the token is stale or `col` is out of range.
    pub fn push(&self, token: &SlotToken, seq: Seq, col: usize, bytes: Arc<[u8]>) -> bool {
        let mut inner = self.inner.write();
        if !self.check_owner(&inner, token) {
            return false;
        }
        let inner = &mut *inner;
        let header = &mut inner.slots[token.slot as usize];
        let Some(region) = header.region.and_then(|h| inner.arena.get_mut(h)) else {
            return false;
        };
        if col >= region.cols {
            return false;
        }
        let pos = header.cursor as usize;
        if region.seqs[pos] != seq || region.committed[pos] {
            if region.clear_position(pos) {
                header.valid -= 1;
            }
            region.seqs[pos] = seq;
        }
        region.set_cell(pos, col, bytes);
        true
    }

    /// Seals the row at the cursor as `seq` and advances the cursor.
    ///
    /// Returns `false` if the token is stale.
    pub fn commit(&self, token: &SlotToken, seq: Seq) -> bool {
        let mut inner = self.inner.write();
        if !self.check_owner(&inner, token) {
            return false;
        }
        let tick = inner.touch();
        let inner = &mut *inner;
        let header = &mut inner.slots[token.slot as usize];
        let Some(region) = header.region.and_then(|h| inner.arena.get_mut(h)) else {
            return false;
        };
        let pos = header.cursor as usize;
        if region.seqs[pos] != seq || region.committed[pos] {
            // Nothing was pushed for this row; commit it with empty cells.
            if region.clear_position(pos) {
                header.valid -= 1;
            }
            region.seqs[pos] = seq;
        }
        region.committed[pos] = true;
        header.valid = (header.valid + 1).min(header.depth);
        header.cursor = ((pos + 1) % region.depth) as u16;
        header.last_active = tick;
        true
    }

    /// Returns up to `max` staged bases for `target_seq` in column `col`.
    ///
    /// Only committed rows with `1 <= target_seq - seq <= depth` and content
    /// in `col` qualify. The result is sorted by ascending tag, nearest base
    /// first. A stale token yields an empty result.
    pub fn get_recent_bases(
        &self,
        token: &SlotToken,
        target_seq: Seq,
        col: usize,
        max: usize,
    ) -> Vec<RecentBase> {
        let inner = self.inner.read();
        if !self.check_owner(&inner, token) {
            return Vec::new();
        }
        let header = &inner.slots[token.slot as usize];
        let Some(region) = header.region.and_then(|h| inner.arena.get(h)) else {
            return Vec::new();
        };
        if col >= region.cols {
            return Vec::new();
        }

        let depth = region.depth;
        let mut bases = Vec::with_capacity(depth.min(max));
        for back in 1..=depth {
            let pos = (header.cursor as usize + depth - back) % depth;
            if !region.committed[pos] {
                continue;
            }
            let seq = region.seqs[pos];
            let Some(tag) = target_seq.checked_sub(seq) else {
                continue;
            };
            if tag == 0 || tag > depth as u64 {
                continue;
            }
            if let Some(bytes) = region.cell(pos, col) {
                bases.push(RecentBase {
                    seq,
                    tag: tag as u16,
                    bytes: Arc::clone(bytes),
                });
            }
        }
        bases.sort_by_key(|b| b.tag);
        bases.truncate(max);
        bases
    }

    /// Cold-fills a freshly claimed slot with already-stored history.
    ///
    /// Rows are staged in ascending sequence order; only the newest `depth`
    /// survive. Returns `false` if the token is stale.
    pub fn populate(&self, token: &SlotToken, mut rows: Vec<StagedRow>) -> bool {
        rows.sort_by_key(|r| r.seq);
        for row in rows {
            for (col, cell) in row.columns.into_iter().enumerate() {
                if let Some(bytes) = cell {
                    if !self.push(token, row.seq, col, bytes) && !self.is_current(token) {
                        return false;
                    }
                }
            }
            if !self.commit(token, row.seq) {
                return false;
            }
        }
        true
    }

    /// Returns whether `token` still owns its slot.
    pub fn is_current(&self, token: &SlotToken) -> bool {
        self.inner.read().is_owner(token)
    }

    /// Releases every slot owned by `table`. Returns the number released.
    pub fn invalidate(&self, table: TableId) -> usize {
        let mut inner = self.inner.write();
        let owned: Vec<usize> = inner
            .slots
            .iter()
            .enumerate()
            .filter(|(_, h)| h.owner.is_some_and(|(t, _)| t == table))
            .map(|(i, _)| i)
            .collect();
        for &slot in &owned {
            inner.free_slot(slot);
        }
        owned.len()
    }

    pub fn stats(&self) -> StagingStats {
        let inner = self.inner.read();
        StagingStats {
            slots: inner.slots.len(),
            claimed: inner.owners.len(),
            regions: inner.arena.live(),
            evicted_while_owned: self.evicted_while_owned.load(Ordering::Relaxed),
            ownership_mismatches: self.ownership_mismatches.load(Ordering::Relaxed),
        }
    }

    fn check_owner(&self, inner: &Inner, token: &SlotToken) -> bool {
        if inner.is_owner(token) {
            return true;
        }
        self.ownership_mismatches.fetch_add(1, Ordering::Relaxed);
        warn_once!(
            STOLEN_SLOT,
            slot = token.slot,
            table = token.table,
            group = %token.group,
            "staging slot reclaimed by another group; falling back to chain reconstruction"
        );
        false
    }
}

#[cfg(test)]
mod tests;
