//! Insert path.
//!
//! Per new version of a group:
//!
//! 1. Hash the key.
//! 2. Allocate the next sequence from the cache; on a miss, read the stored
//!    maximum and seed the cache with it.
//! 3. Claim the group's staging slot. A freshly claimed slot for a group with
//!    history is warmed from the resolver.
//! 4. Encode every delta column: a keyframe when forced or when no base is
//!    available, otherwise the smallest of all candidate diffs.
//! 5. Append the row. A failed append rolls the sequence back.
//! 6. Stage the raw content, record both location directions and cache the
//!    content.
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use cache::{ContentKey, Location};
use codec::Tag;
use config::DeltaConfig;
use encoder::{EncodeTask, EncodedRecord};
use grouphash::{GroupHash, KeyValue, Seq, TableId};
use staging::{RecentBase, SlotToken, StagedRow};
use tracing::debug;

use crate::store::StoredRow;
use crate::DeltaStore;

/// What an insert stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    pub group: GroupHash,
    pub seq: Seq,
    pub location: Location,
    /// Tag chosen for each delta column.
    pub tags: Vec<Tag>,
    /// Sum of the raw column sizes.
    pub raw_bytes: usize,
    /// Sum of the stored record sizes.
    pub stored_bytes: usize,
}

impl InsertOutcome {
    /// Number of columns stored as keyframes.
    pub fn keyframes(&self) -> usize {
        self.tags.iter().filter(|t| t.is_keyframe()).count()
    }
}

impl DeltaStore {
    /// Appends a new version of the group `key` to `table`.
    ///
    /// `columns` holds the raw content of every delta column. The caller must
    /// hold the advisory lock for [`lock_id`](Self::lock_id).
    ///
    /// # Errors
    ///
    /// Fails if the table does not exist, the column count is wrong, the key
    /// cannot be hashed, a needed base is corrupt, or the row store rejects
    /// the append. No sequence number is consumed by a failed insert.
    pub fn insert(&self, table: TableId, key: &KeyValue, columns: Vec<Vec<u8>>) -> Result<InsertOutcome> {
        let outcome = self.insert_row(table, key, columns)?;
        self.stats.apply_one(table, &outcome);
        Ok(outcome)
    }

    pub(crate) fn insert_row(
        &self,
        table: TableId,
        key: &KeyValue,
        columns: Vec<Vec<u8>>,
    ) -> Result<InsertOutcome> {
        let group = self.group_hash(key)?;
        let tables = self.tables.read();
        let state = tables
            .get(&table)
            .ok_or_else(|| anyhow!("table {table} does not exist"))?;
        ensure!(
            columns.len() == state.columns,
            "table {table} has {} delta columns, got {}",
            state.columns,
            columns.len()
        );

        let seq = self.allocate_seq(table, group)?;
        let contents: Vec<Arc<[u8]>> = columns.into_iter().map(Arc::from).collect();
        match self.store_version(table, group, seq, &state.config, contents) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if !self.service.sequences().rollback(table, group, seq) {
                    debug!(table, %group, seq, "sequence rollback skipped");
                }
                Err(err)
            }
        }
    }

    fn allocate_seq(&self, table: TableId, group: GroupHash) -> Result<Seq> {
        let sequences = self.service.sequences();
        let seq = sequences.next(table, group);
        if seq != 0 {
            return Ok(seq);
        }
        let max = self
            .store
            .max_seq(table, group)
            .with_context(|| format!("reading max sequence of table {table}"))?;
        let seq = sequences.allocate_after(table, group, max);
        debug!(table, %group, max, seq, "sequence cache miss; seeded from row store");
        Ok(seq)
    }

    fn store_version(
        &self,
        table: TableId,
        group: GroupHash,
        seq: Seq,
        config: &DeltaConfig,
        contents: Vec<Arc<[u8]>>,
    ) -> Result<InsertOutcome> {
        let staging = self.service.staging();
        let (token, is_new) = staging.acquire(table, group, config.depth, contents.len());
        if is_new && seq > 1 {
            self.warm_slot(table, group, seq, config.depth, contents.len(), &token)?;
        }

        let mut records = Vec::with_capacity(contents.len());
        for (col, content) in contents.iter().enumerate() {
            records.push(self.encode_column(table, group, seq, col, content, config, &token)?);
        }

        let tags: Vec<Tag> = records.iter().map(|r| r.tag).collect();
        let stored_bytes = records.iter().map(EncodedRecord::size).sum();
        let raw_bytes = contents.iter().map(|c| c.len()).sum();
        let row = StoredRow {
            group,
            seq,
            columns: records.into_iter().map(|r| r.bytes).collect(),
        };
        let location = self
            .store
            .append(table, row)
            .with_context(|| format!("appending seq {seq} to table {table}"))?;

        for (col, content) in contents.iter().enumerate() {
            staging.push(&token, seq, col, Arc::clone(content));
        }
        staging.commit(&token, seq);
        self.service.locations().record(table, location, group, seq);
        let cache = self.service.content();
        for (col, content) in contents.into_iter().enumerate() {
            cache.put(ContentKey::new(table, group, seq, col as u16), content);
        }

        Ok(InsertOutcome {
            group,
            seq,
            location,
            tags,
            raw_bytes,
            stored_bytes,
        })
    }

    /// Cold-fills a new staging slot with the last `depth` stored versions.
    fn warm_slot(
        &self,
        table: TableId,
        group: GroupHash,
        seq: Seq,
        depth: usize,
        cols: usize,
        token: &SlotToken,
    ) -> Result<()> {
        let resolver = self.resolver();
        let first = seq.saturating_sub(depth as Seq).max(1);
        let mut rows = Vec::with_capacity(depth);
        for at in first..seq {
            let mut columns = Vec::with_capacity(cols);
            for col in 0..cols {
                columns.push(resolver.resolve(table, group, at, col)?);
            }
            if columns.iter().any(Option::is_some) {
                rows.push(StagedRow { seq: at, columns });
            }
        }
        debug!(table, %group, seq, rows = rows.len(), "warming staging slot");
        self.service.staging().populate(token, rows);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_column(
        &self,
        table: TableId,
        group: GroupHash,
        seq: Seq,
        col: usize,
        content: &Arc<[u8]>,
        config: &DeltaConfig,
        token: &SlotToken,
    ) -> Result<EncodedRecord> {
        let extra_pass = config.enable_extra_pass;
        let keyframe = encoder::keyframe(self.codec.as_ref(), content, extra_pass)
            .ok_or_else(|| anyhow!("codec failed to encode a keyframe"))?;
        if config.forces_keyframe(seq) {
            return Ok(keyframe);
        }

        let bases = self.collect_bases(table, group, seq, col, config.depth, token)?;
        if bases.is_empty() {
            debug!(table, %group, seq, col, "no diff base available; storing keyframe");
            return Ok(keyframe);
        }
        let candidates = bases
            .into_iter()
            .map(|b| EncodeTask {
                tag: Tag::Back(b.tag),
                base: b.bytes,
            })
            .collect();
        Ok(self.service.encoder().execute(
            &self.codec,
            Arc::clone(content),
            candidates,
            keyframe,
            extra_pass,
        ))
    }

    /// Staged bases for `seq`, topped up from the resolver for any version
    /// the slot does not hold.
    fn collect_bases(
        &self,
        table: TableId,
        group: GroupHash,
        seq: Seq,
        col: usize,
        depth: usize,
        token: &SlotToken,
    ) -> Result<Vec<RecentBase>> {
        let wanted = depth.min((seq - 1) as usize);
        let mut bases = self.service.staging().get_recent_bases(token, seq, col, wanted);
        if bases.len() == wanted {
            return Ok(bases);
        }

        let resolver = self.resolver();
        for back in 1..=wanted {
            let at = seq - back as Seq;
            if bases.iter().any(|b| b.seq == at) {
                continue;
            }
            if let Some(bytes) = resolver.resolve(table, group, at, col)? {
                bases.push(RecentBase {
                    seq: at,
                    tag: back as u16,
                    bytes,
                });
            }
        }
        bases.sort_by_key(|b| b.tag);
        Ok(bases)
    }
}
