/// Read path: get(), get_column(), latest_seq(), history(), seq_at().
///
/// Content comes from the resolver, which serves cached versions directly
/// and walks delta chains for the rest. Sequence and location lookups use
/// their caches first and fall back to the row store, repopulating the cache
/// on the way out.
///
/// Every read holds the table map shared until it returns, so nothing it
/// caches can land after a truncate or drop has invalidated the table.

use std::collections::HashMap;

use anyhow::{anyhow, ensure, Result};
use cache::Location;
use grouphash::{KeyValue, Seq, TableId};
use tracing::debug;

use crate::{DeltaStore, TableState};

impl DeltaStore {
    /// Reconstructs every delta column of version `seq` of `key`.
    ///
    /// Returns `None` if the version is not stored or its chain is broken.
    ///
    /// # Errors
    ///
    /// Fails on an unknown table, a row-store error, or a corrupt record
    /// ([`ChainError`](crate::ChainError)).
    pub fn get(&self, table: TableId, key: &KeyValue, seq: Seq) -> Result<Option<Vec<Vec<u8>>>> {
        let tables = self.tables.read();
        let columns = columns_of(&tables, table)?;
        let group = self.group_hash(key)?;
        let resolver = self.resolver();
        let mut out = Vec::with_capacity(columns);
        for col in 0..columns {
            match resolver.resolve(table, group, seq, col)? {
                Some(content) => out.push(content.to_vec()),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }

    /// Reconstructs a single delta column of version `seq` of `key`.
    pub fn get_column(
        &self,
        table: TableId,
        key: &KeyValue,
        seq: Seq,
        column: usize,
    ) -> Result<Option<Vec<u8>>> {
        let tables = self.tables.read();
        let columns = columns_of(&tables, table)?;
        ensure!(
            column < columns,
            "table {table} has {columns} delta columns, asked for column {column}"
        );
        let group = self.group_hash(key)?;
        Ok(self
            .resolver()
            .resolve(table, group, seq, column)?
            .map(|content| content.to_vec()))
    }

    /// Highest stored sequence of `key`, or `None` for a group with no
    /// versions.
    pub fn latest_seq(&self, table: TableId, key: &KeyValue) -> Result<Option<Seq>> {
        let tables = self.tables.read();
        columns_of(&tables, table)?;
        let group = self.group_hash(key)?;
        let sequences = self.service.sequences();
        if let Some(seq) = sequences.get(table, group) {
            return Ok((seq > 0).then_some(seq));
        }
        let max = self.store.max_seq(table, group)?;
        if max == 0 {
            return Ok(None);
        }
        debug!(table, %group, max, "latest sequence read from row store");
        sequences.raise(table, group, max);
        Ok(Some(max))
    }

    /// Every stored sequence of `key`, ascending.
    pub fn history(&self, table: TableId, key: &KeyValue) -> Result<Vec<Seq>> {
        let tables = self.tables.read();
        columns_of(&tables, table)?;
        let group = self.group_hash(key)?;
        let locations = self.service.locations();
        let mut seqs: Vec<Seq> = self
            .store
            .scan_group(table, group)?
            .into_iter()
            .map(|(location, row)| {
                locations.record(table, location, row.group, row.seq);
                row.seq
            })
            .collect();
        seqs.sort_unstable();
        Ok(seqs)
    }

    /// Logical sequence of the row stored at `location`.
    ///
    /// A cached mapping is checked against the row store, since rows can
    /// move; a stale one is dropped and the row store answers instead.
    pub fn seq_at(&self, table: TableId, location: Location) -> Result<Option<Seq>> {
        let tables = self.tables.read();
        columns_of(&tables, table)?;
        let locations = self.service.locations();
        let cached = locations.seq_at(table, location);
        let row = self.store.fetch(table, location)?;
        match (cached, row) {
            (Some(seq), Some(row)) if row.seq == seq => Ok(Some(seq)),
            (cached, row) => {
                if cached.is_some() {
                    debug!(table, %location, "stale forward index entry");
                    locations.forget_forward(table, location);
                }
                Ok(row.map(|row| {
                    locations.record(table, location, row.group, row.seq);
                    row.seq
                }))
            }
        }
    }
}

fn columns_of(tables: &HashMap<TableId, TableState>, table: TableId) -> Result<usize> {
    tables
        .get(&table)
        .map(|t| t.columns)
        .ok_or_else(|| anyhow!("table {table} does not exist"))
}
