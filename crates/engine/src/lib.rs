//! # Engine - DeltaChain Storage Engine
//!
//! Ties the [`cache`], [`staging`], [`encoder`] and [`codec`] crates together
//! on top of a host-supplied [`RowStore`] into a delta-compressed, append-only
//! version store. Every group key owns a chain of versions numbered from 1;
//! each delta column of a version is stored either as a keyframe or as a diff
//! against one of its `depth` predecessors, whichever is smallest.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────────────┐
//! │                     DELTASTORE                        │
//! │                                                       │
//! │ write.rs → SequenceAllocator.next                     │
//! │              → staging bases (or resolver fallback)   │
//! │              → EncodeScheduler.execute                │
//! │              → RowStore.append                        │
//! │              → staging commit + location/content cache│
//! │                                                       │
//! │ read.rs  → DeltaChainResolver                         │
//! │              ContentCache → LocationIndex →           │
//! │              RowStore.find → RowStore.scan_group      │
//! └───────────────────────────────────────────────────────┘
//!                 │ shared by every store
//!                 v
//!          CacheService (caches, staging, encode pool)
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module          | Purpose                                                |
//! |-----------------|--------------------------------------------------------|
//! | [`lib.rs`]      | `DeltaStore` struct, constructor, accessors, `Debug`   |
//! | [`service`]     | `CacheService`: owns and sizes every shared component  |
//! | [`store`]       | `RowStore` collaborator trait and `MemRowStore`        |
//! | [`resolve`]     | `DeltaChainResolver`: iterative chain reconstruction   |
//! | `write`         | `insert()` path                                        |
//! | `read`          | `get()`, `get_column()`, `latest_seq()`, `history()`   |
//! | `lifecycle`     | `create_table()`, `truncate()`, `drop_table()`         |
//! | [`stats`]       | per-group statistics and `Transaction`                 |
//!
//! ## Writers
//!
//! The engine assumes one writer per `(table, group)` at a time. Callers
//! serialize writers with their own advisory lock keyed by
//! [`DeltaStore::lock_id`]; concurrent readers need no coordination.
mod error;
mod lifecycle;
mod read;
pub mod resolve;
pub mod service;
pub mod stats;
pub mod store;
mod write;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use codec::Codec;
use config::DeltaConfig;
use grouphash::{Detoast, GroupHash, GroupKeyHasher, InlineOnly, KeyValue, TableId};
use parking_lot::RwLock;

pub use cache::Location;
pub use codec::{DiffCodec, Tag};
pub use error::ChainError;
pub use resolve::DeltaChainResolver;
pub use service::{CacheService, Invalidated, ServiceMetrics};
pub use stats::{GroupStats, StatsAccumulator, Transaction};
pub use store::{MemRowStore, RowStore, StoreCounters, StoredRow};
pub use write::InsertOutcome;

/// Registered settings of one table.
#[derive(Debug, Clone)]
pub(crate) struct TableState {
    pub(crate) config: DeltaConfig,
    pub(crate) columns: usize,
}

/// A delta-compressed version store over one [`RowStore`].
pub struct DeltaStore {
    pub(crate) service: Arc<CacheService>,
    pub(crate) store: Arc<dyn RowStore>,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) hasher: GroupKeyHasher<Arc<dyn Detoast + Send + Sync>>,
    pub(crate) tables: RwLock<HashMap<TableId, TableState>>,
    pub(crate) stats: stats::StatsTable,
}

impl std::fmt::Debug for DeltaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaStore")
            .field("service", &self.service)
            .field("tables", &self.tables.read().len())
            .finish_non_exhaustive()
    }
}

impl DeltaStore {
    /// Attaches a store to `service`.
    ///
    /// Group keys must be inline; use [`with_detoast`](Self::with_detoast)
    /// when the row store hands out compressed or out-of-line keys.
    pub fn new(service: Arc<CacheService>, store: Arc<dyn RowStore>, codec: Arc<dyn Codec>) -> Self {
        let inline: Arc<dyn Detoast + Send + Sync> = Arc::new(InlineOnly);
        Self {
            service,
            store,
            codec,
            hasher: GroupKeyHasher::new(inline),
            tables: RwLock::new(HashMap::new()),
            stats: stats::StatsTable::default(),
        }
    }

    /// Resolves indirect group keys through `detoast` before hashing.
    pub fn with_detoast(mut self, detoast: Arc<dyn Detoast + Send + Sync>) -> Self {
        self.hasher = GroupKeyHasher::new(detoast);
        self
    }

    pub fn service(&self) -> &Arc<CacheService> {
        &self.service
    }

    pub fn row_store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Fingerprint of a group key.
    pub fn group_hash(&self, key: &KeyValue) -> Result<GroupHash> {
        self.hasher.hash(key).context("could not hash group key")
    }

    /// Advisory lock id the caller must hold while writing to this group.
    pub fn lock_id(&self, table: TableId, key: &KeyValue) -> Result<u64> {
        Ok(grouphash::lock_id(table, self.group_hash(key)?))
    }

    /// A resolver bound to this store's service, row store and codec.
    pub fn resolver(&self) -> DeltaChainResolver<'_> {
        DeltaChainResolver::new(&self.service, self.store.as_ref(), self.codec.as_ref())
    }

    /// Settings of `table`, if it exists.
    pub fn table_config(&self, table: TableId) -> Option<DeltaConfig> {
        self.tables.read().get(&table).map(|t| t.config.clone())
    }

    /// Number of delta columns of `table`, if it exists.
    pub fn table_columns(&self, table: TableId) -> Option<usize> {
        self.tables.read().get(&table).map(|t| t.columns)
    }
}

#[cfg(test)]
mod tests;
