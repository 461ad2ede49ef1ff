//! Delta chain reconstruction.
//!
//! ```text
//! resolve(seq = 7)
//!   content cache hit?  ── yes ──> done
//!        │ no
//!   locate row 7  (reverse index → store index → group scan)
//!   tag = -2 ──> push 7, continue at seq 5
//!   locate row 5: tag = -1 ──> push 5, continue at seq 4
//!   seq 4 cached (or a keyframe) ──> stop
//!
//!   pop 5: decode against 4, cache ──> pop 7: decode against 5, cache
//! ```
//!
//! The walk runs on an explicit stack, so chain length never translates into
//! call depth, and every version decoded on the way is memoized in the content
//! cache. A missing row anywhere on the chain is a soft failure (`Ok(None)`);
//! a record the codec rejects is [`ChainError::Corruption`].
use std::sync::Arc;

use anyhow::Result;
use cache::{warn_once, ContentKey, LogOnce};
use codec::Codec;
use grouphash::{GroupHash, Seq, TableId};
use tracing::debug;

use crate::error::ChainError;
use crate::service::CacheService;
use crate::store::{RowStore, StoredRow};

static BROKEN_CHAIN: LogOnce = LogOnce::new();

/// Rebuilds column content from stored delta records.
pub struct DeltaChainResolver<'a> {
    service: &'a CacheService,
    store: &'a dyn RowStore,
    codec: &'a dyn Codec,
}

impl<'a> DeltaChainResolver<'a> {
    pub fn new(service: &'a CacheService, store: &'a dyn RowStore, codec: &'a dyn Codec) -> Self {
        Self {
            service,
            store,
            codec,
        }
    }

    /// Returns the content of `column` at `(group, seq)`.
    ///
    /// `Ok(None)` means the version, or a base it depends on, is not stored.
    pub fn resolve(
        &self,
        table: TableId,
        group: GroupHash,
        seq: Seq,
        column: usize,
    ) -> Result<Option<Arc<[u8]>>> {
        if seq == 0 {
            return Ok(None);
        }
        let content = self.service.content();
        let key = |s: Seq| ContentKey::new(table, group, s, column as u16);

        let mut pending: Vec<(Seq, Vec<u8>)> = Vec::new();
        let mut current: Option<Arc<[u8]>> = None;
        let mut at = seq;
        loop {
            if let Some(hit) = content.get(&key(at)) {
                current = Some(hit);
                break;
            }
            let Some(mut row) = self.locate(table, group, at)? else {
                self.broken(table, group, seq, at);
                return Ok(None);
            };
            if column >= row.columns.len() {
                self.broken(table, group, seq, at);
                return Ok(None);
            }
            let record = row.columns.swap_remove(column);
            let tag = self.codec.tag_of(&record).map_err(|source| ChainError::Corruption {
                table,
                group,
                seq: at,
                column,
                source,
            })?;
            pending.push((at, record));
            if tag.is_keyframe() {
                break;
            }
            match tag.base_seq(at) {
                Some(base) => at = base,
                None => {
                    self.broken(table, group, seq, at);
                    return Ok(None);
                }
            }
        }

        while let Some((at, record)) = pending.pop() {
            let base = current.as_deref().unwrap_or(&[]);
            let decoded = self
                .codec
                .decode(base, &record)
                .map_err(|source| ChainError::Corruption {
                    table,
                    group,
                    seq: at,
                    column,
                    source,
                })?;
            let decoded: Arc<[u8]> = decoded.into();
            content.put(key(at), Arc::clone(&decoded));
            current = Some(decoded);
        }
        Ok(current)
    }

    /// Finds the stored row for `(group, seq)`, cheapest tier first.
    pub fn locate(&self, table: TableId, group: GroupHash, seq: Seq) -> Result<Option<StoredRow>> {
        let locations = self.service.locations();

        if let Some(location) = locations.location_of(table, group, seq) {
            match self.store.fetch(table, location)? {
                Some(row) if row.group == group && row.seq == seq => return Ok(Some(row)),
                _ => {
                    debug!(table, %group, seq, %location, "stale reverse index entry");
                    locations.forget_reverse(table, group, seq);
                    locations.forget_forward(table, location);
                }
            }
        }

        if let Some((location, row)) = self.store.find(table, group, seq)? {
            locations.record(table, location, group, seq);
            return Ok(Some(row));
        }

        debug!(table, %group, seq, "row not indexed; scanning group");
        let mut found = None;
        for (location, row) in self.store.scan_group(table, group)? {
            locations.record(table, location, row.group, row.seq);
            if row.seq == seq {
                found = Some(row);
            }
        }
        Ok(found)
    }

    fn broken(&self, table: TableId, group: GroupHash, seq: Seq, missing: Seq) {
        debug!(table, %group, seq, missing, "delta chain base missing");
        warn_once!(
            BROKEN_CHAIN,
            table,
            %group,
            seq,
            missing,
            "delta chain has a missing base; returning no content"
        );
    }
}
