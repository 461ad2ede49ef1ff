//! Row-storage collaborator.
//!
//! The engine never does physical I/O itself. It hands finished rows to a
//! [`RowStore`] and asks it for rows back by location, by `(group, seq)`
//! through an index when one exists, or by scanning a group. Locations are
//! opaque to everything except the store that issued them.
//!
//! [`MemRowStore`] keeps rows in memory and backs the tests, the shell and
//! the benchmarks.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use anyhow::{bail, Result};
use cache::Location;
use grouphash::{GroupHash, Seq, TableId};
use parking_lot::RwLock;

/// One stored version: a delta record per delta column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub group: GroupHash,
    pub seq: Seq,
    pub columns: Vec<Vec<u8>>,
}

/// Physical row storage supplied by the host.
pub trait RowStore: Send + Sync {
    /// Stores `row` and returns where it landed.
    fn append(&self, table: TableId, row: StoredRow) -> Result<Location>;

    /// Reads the row at `location`, if it still exists.
    fn fetch(&self, table: TableId, location: Location) -> Result<Option<StoredRow>>;

    /// Index-assisted lookup. Returns `Ok(None)` when the row is absent or the
    /// store has no `(group, seq)` index.
    fn find(&self, table: TableId, group: GroupHash, seq: Seq)
        -> Result<Option<(Location, StoredRow)>>;

    /// Every row of `group`, in no particular order.
    fn scan_group(&self, table: TableId, group: GroupHash) -> Result<Vec<(Location, StoredRow)>>;

    /// Highest stored sequence of `group`, `0` if it has none.
    fn max_seq(&self, table: TableId, group: GroupHash) -> Result<Seq>;

    /// Removes every row of `table`.
    fn truncate(&self, table: TableId) -> Result<()>;

    /// Removes `table` entirely.
    fn drop_table(&self, table: TableId) -> Result<()>;
}

/// Access counters of a [`MemRowStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounters {
    pub appends: u64,
    pub fetches: u64,
    pub finds: u64,
    pub scans: u64,
}

#[derive(Debug, Default)]
struct TableRows {
    rows: Vec<Option<StoredRow>>,
    index: HashMap<(GroupHash, Seq), usize>,
}

impl TableRows {
    fn push(&mut self, row: StoredRow) -> usize {
        let slot = self.rows.len();
        self.index.insert((row.group, row.seq), slot);
        self.rows.push(Some(row));
        slot
    }
}

/// In-memory [`RowStore`].
///
/// Locations encode `(table, row number)`. The `(group, seq)` index can be
/// switched off to force the resolver onto its scan fallback.
#[derive(Debug)]
pub struct MemRowStore {
    tables: RwLock<HashMap<TableId, TableRows>>,
    indexed: bool,
    failing_appends: AtomicUsize,
    appends: AtomicU64,
    fetches: AtomicU64,
    finds: AtomicU64,
    scans: AtomicU64,
}

impl Default for MemRowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemRowStore {
    /// A store with a `(group, seq)` index.
    pub fn new() -> Self {
        Self::with_index(true)
    }

    pub fn with_index(indexed: bool) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            indexed,
            failing_appends: AtomicUsize::new(0),
            appends: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            finds: AtomicU64::new(0),
            scans: AtomicU64::new(0),
        }
    }

    /// Makes the next `n` appends fail.
    pub fn fail_next_appends(&self, n: usize) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    /// Moves a row to a new location, leaving the old one empty.
    pub fn relocate(&self, table: TableId, location: Location) -> Option<Location> {
        let mut tables = self.tables.write();
        let t = tables.get_mut(&table)?;
        let row = t.rows.get_mut(row_index(table, location)?)?.take()?;
        let slot = t.push(row);
        Some(encode_location(table, slot))
    }

    /// Deletes a single row.
    pub fn remove(&self, table: TableId, location: Location) -> Option<StoredRow> {
        let mut tables = self.tables.write();
        let t = tables.get_mut(&table)?;
        let row = t.rows.get_mut(row_index(table, location)?)?.take()?;
        t.index.remove(&(row.group, row.seq));
        Some(row)
    }

    /// Overwrites one stored delta record in place.
    pub fn overwrite(&self, table: TableId, location: Location, column: usize, record: Vec<u8>) -> bool {
        let mut tables = self.tables.write();
        let cell = tables
            .get_mut(&table)
            .and_then(|t| row_index(table, location).and_then(|i| t.rows.get_mut(i)))
            .and_then(|row| row.as_mut())
            .and_then(|row| row.columns.get_mut(column));
        match cell {
            Some(cell) => {
                *cell = record;
                true
            }
            None => false,
        }
    }

    /// Number of live rows in `table`.
    pub fn row_count(&self, table: TableId) -> usize {
        self.tables
            .read()
            .get(&table)
            .map_or(0, |t| t.rows.iter().flatten().count())
    }

    /// Total bytes of stored delta records in `table`.
    pub fn stored_bytes(&self, table: TableId) -> usize {
        self.tables.read().get(&table).map_or(0, |t| {
            t.rows
                .iter()
                .flatten()
                .flat_map(|row| row.columns.iter())
                .map(Vec::len)
                .sum()
        })
    }

    pub fn counters(&self) -> StoreCounters {
        StoreCounters {
            appends: self.appends.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            finds: self.finds.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
        }
    }

    fn take_failure(&self) -> bool {
        self.failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn encode_location(table: TableId, slot: usize) -> Location {
    Location::new((u64::from(table) << 32) | slot as u64)
}

fn row_index(table: TableId, location: Location) -> Option<usize> {
    let raw = location.get();
    ((raw >> 32) as TableId == table).then_some((raw & u64::from(u32::MAX)) as usize)
}

impl RowStore for MemRowStore {
    fn append(&self, table: TableId, row: StoredRow) -> Result<Location> {
        if self.take_failure() {
            bail!("row store rejected append to table {table}");
        }
        self.appends.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.write();
        let t = tables.entry(table).or_default();
        if t.rows.len() > u32::MAX as usize {
            bail!("table {table} is full");
        }
        let slot = t.push(row);
        Ok(encode_location(table, slot))
    }

    fn fetch(&self, table: TableId, location: Location) -> Result<Option<StoredRow>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        Ok(tables
            .get(&table)
            .zip(row_index(table, location))
            .and_then(|(t, i)| t.rows.get(i))
            .and_then(Clone::clone))
    }

    fn find(
        &self,
        table: TableId,
        group: GroupHash,
        seq: Seq,
    ) -> Result<Option<(Location, StoredRow)>> {
        if !self.indexed {
            return Ok(None);
        }
        self.finds.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        let Some(t) = tables.get(&table) else {
            return Ok(None);
        };
        Ok(t.index.get(&(group, seq)).and_then(|&slot| {
            t.rows[slot]
                .clone()
                .map(|row| (encode_location(table, slot), row))
        }))
    }

    fn scan_group(&self, table: TableId, group: GroupHash) -> Result<Vec<(Location, StoredRow)>> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        let Some(t) = tables.get(&table) else {
            return Ok(Vec::new());
        };
        Ok(t.rows
            .iter()
            .enumerate()
            .filter_map(|(slot, row)| {
                row.as_ref()
                    .filter(|r| r.group == group)
                    .map(|r| (encode_location(table, slot), r.clone()))
            })
            .collect())
    }

    fn max_seq(&self, table: TableId, group: GroupHash) -> Result<Seq> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        Ok(tables.get(&table).map_or(0, |t| {
            t.rows
                .iter()
                .flatten()
                .filter(|r| r.group == group)
                .map(|r| r.seq)
                .max()
                .unwrap_or(0)
        }))
    }

    fn truncate(&self, table: TableId) -> Result<()> {
        if let Some(t) = self.tables.write().get_mut(&table) {
            t.rows.clear();
            t.index.clear();
        }
        Ok(())
    }

    fn drop_table(&self, table: TableId) -> Result<()> {
        self.tables.write().remove(&table);
        Ok(())
    }
}
