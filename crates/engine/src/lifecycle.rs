/// Relation lifecycle: create_table(), truncate(), drop_table().
///
/// Truncate and drop take the table map exclusively, so no insert into the
/// table is in flight while its rows go away and its cache entries are
/// invalidated, and none can claim a staging slot for it until they are done.

use anyhow::{bail, ensure, Context, Result};
use config::DeltaConfig;
use grouphash::TableId;
use tracing::info;

use crate::service::Invalidated;
use crate::{DeltaStore, TableState};

impl DeltaStore {
    /// Registers `table` with `columns` delta columns.
    ///
    /// Any cache entries left over from an earlier table with the same id are
    /// dropped.
    pub fn create_table(&self, table: TableId, columns: usize, config: DeltaConfig) -> Result<()> {
        config
            .validate()
            .with_context(|| format!("invalid settings for table {table}"))?;
        ensure!(
            columns <= u16::MAX as usize,
            "table {table}: at most {} delta columns are supported",
            u16::MAX
        );

        let mut tables = self.tables.write();
        if tables.contains_key(&table) {
            bail!("table {table} already exists");
        }
        self.service.invalidate_table(table);
        info!(table, columns, depth = config.depth, "table created");
        tables.insert(table, TableState { config, columns });
        Ok(())
    }

    /// Removes every row of `table` and invalidates its cache entries.
    pub fn truncate(&self, table: TableId) -> Result<Invalidated> {
        let tables = self.tables.write();
        ensure!(tables.contains_key(&table), "table {table} does not exist");
        self.store
            .truncate(table)
            .with_context(|| format!("truncating table {table}"))?;
        self.stats.forget_table(table);
        let dropped = self.service.invalidate_table(table);
        info!(table, "table truncated");
        drop(tables);
        Ok(dropped)
    }

    /// Removes `table`, its rows and its cache entries.
    pub fn drop_table(&self, table: TableId) -> Result<Invalidated> {
        let mut tables = self.tables.write();
        ensure!(tables.contains_key(&table), "table {table} does not exist");
        self.store
            .drop_table(table)
            .with_context(|| format!("dropping table {table}"))?;
        tables.remove(&table);
        self.stats.forget_table(table);
        let dropped = self.service.invalidate_table(table);
        info!(table, "table dropped");
        Ok(dropped)
    }
}
