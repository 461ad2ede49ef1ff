use std::sync::Arc;

use anyhow::Result;
use config::{CacheConfig, DeltaConfig};
use grouphash::{GroupHash, KeyValue, Seq, TableId};
use parking_lot::{Condvar, Mutex};

use crate::*;

pub const TABLE: TableId = 1;
pub const COLUMNS: usize = 2;

/// A store over an in-memory row store, with [`TABLE`] created.
pub struct Harness {
    pub rows: Arc<MemRowStore>,
    pub db: DeltaStore,
}

impl Harness {
    pub fn new() -> Result<Self> {
        Self::with(CacheConfig::default(), DeltaConfig::default(), MemRowStore::new())
    }

    pub fn with(cache: CacheConfig, delta: DeltaConfig, rows: MemRowStore) -> Result<Self> {
        let service = CacheService::new(cache)?;
        Self::attach(service, delta, Arc::new(rows))
    }

    /// Attaches a fresh store to an existing service and row store.
    pub fn attach(
        service: Arc<CacheService>,
        delta: DeltaConfig,
        rows: Arc<MemRowStore>,
    ) -> Result<Self> {
        let db = DeltaStore::new(service, rows.clone(), Arc::new(DiffCodec::new()));
        db.create_table(TABLE, COLUMNS, delta)?;
        Ok(Self { rows, db })
    }

    /// Inserts `count` consecutive versions of `group`.
    pub fn fill(&self, group: &str, count: u64) -> Result<Vec<InsertOutcome>> {
        let key = key(group);
        (1..=count)
            .map(|seq| self.db.insert(TABLE, &key, row(group, seq)))
            .collect()
    }
}

/// Caches shrunk to nothing so every read goes to the row store.
pub fn uncached() -> CacheConfig {
    CacheConfig::default()
        .sequence_cache_mb(0)
        .location_cache_mb(0)
        .content_cache_mb(0)
}

pub fn key(group: &str) -> KeyValue {
    KeyValue::Text(group.to_string())
}

/// Column `col` of version `seq`: a shared body with one line that changes
/// per version, so consecutive versions diff well.
pub fn payload(group: &str, seq: u64, col: usize) -> Vec<u8> {
    let mut out = String::new();
    for line in 0..40 {
        if line as u64 == seq % 40 {
            out.push_str(&format!("{group}/{col}: line {line:02} rewritten at version {seq}\n"));
        } else {
            out.push_str(&format!("{group}/{col}: line {line:02} unchanged filler text\n"));
        }
    }
    out.push_str(&format!("footer {seq}\n"));
    out.into_bytes()
}

pub fn row(group: &str, seq: u64) -> Vec<Vec<u8>> {
    (0..COLUMNS).map(|col| payload(group, seq, col)).collect()
}

/// Row-store operations a [`GatedRows`] can park in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    MaxSeq,
    Find,
}

#[derive(Debug, Default)]
struct GateState {
    armed: Option<Pause>,
    parked: bool,
    released: bool,
}

/// Row store that parks the first caller of an armed operation after the
/// inner store has answered, until the test releases it.
#[derive(Debug)]
pub struct GatedRows {
    pub inner: Arc<MemRowStore>,
    state: Mutex<GateState>,
    wake: Condvar,
}

impl GatedRows {
    pub fn new(inner: Arc<MemRowStore>) -> Self {
        Self {
            inner,
            state: Mutex::new(GateState::default()),
            wake: Condvar::new(),
        }
    }

    pub fn arm(&self, op: Pause) {
        self.state.lock().armed = Some(op);
    }

    /// Blocks until a caller is parked.
    pub fn wait_parked(&self) {
        let mut state = self.state.lock();
        while !state.parked {
            self.wake.wait(&mut state);
        }
    }

    pub fn release(&self) {
        self.state.lock().released = true;
        self.wake.notify_all();
    }

    fn pause(&self, op: Pause) {
        let mut state = self.state.lock();
        if state.armed != Some(op) {
            return;
        }
        state.armed = None;
        state.parked = true;
        self.wake.notify_all();
        while !state.released {
            self.wake.wait(&mut state);
        }
    }
}

impl RowStore for GatedRows {
    fn append(&self, table: TableId, row: StoredRow) -> Result<Location> {
        self.inner.append(table, row)
    }

    fn fetch(&self, table: TableId, location: Location) -> Result<Option<StoredRow>> {
        self.inner.fetch(table, location)
    }

    fn find(
        &self,
        table: TableId,
        group: GroupHash,
        seq: Seq,
    ) -> Result<Option<(Location, StoredRow)>> {
        let found = self.inner.find(table, group, seq)?;
        self.pause(Pause::Find);
        Ok(found)
    }

    fn scan_group(&self, table: TableId, group: GroupHash) -> Result<Vec<(Location, StoredRow)>> {
        self.inner.scan_group(table, group)
    }

    fn max_seq(&self, table: TableId, group: GroupHash) -> Result<Seq> {
        let max = self.inner.max_seq(table, group)?;
        self.pause(Pause::MaxSeq);
        Ok(max)
    }

    fn truncate(&self, table: TableId) -> Result<()> {
        self.inner.truncate(table)
    }

    fn drop_table(&self, table: TableId) -> Result<()> {
        self.inner.drop_table(table)
    }
}

/// A store over `rows` with [`TABLE`] created and inline encoding.
pub fn gated_store(rows: Arc<GatedRows>) -> Result<DeltaStore> {
    let service = CacheService::new(CacheConfig::default().num_encode_threads(0))?;
    let db = DeltaStore::new(service, rows, Arc::new(DiffCodec::new()));
    db.create_table(TABLE, COLUMNS, DeltaConfig::default())?;
    Ok(db)
}
