//! The shared cache service.
//!
//! One `CacheService` is built at startup from a [`CacheConfig`] and owns
//! every cache, the staging buffer and the encode pool. Each store instance
//! attaches to it through an `Arc`; [`detach`](CacheService::detach) stops
//! the encode pool when the last user is done with it.
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use cache::{
    CacheStats, ContentCache, ContentStats, LocationIndex, LocationStats, SequenceAllocator,
};
use config::CacheConfig;
use encoder::{EncodeScheduler, EncoderStats};
use grouphash::TableId;
use staging::{InsertStagingBuffer, StagingStats};
use tracing::info;

/// Entries dropped by [`CacheService::invalidate_table`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Invalidated {
    pub sequences: usize,
    pub locations: usize,
    pub contents: usize,
    pub staging_slots: usize,
}

impl Invalidated {
    pub fn total(&self) -> usize {
        self.sequences + self.locations + self.contents + self.staging_slots
    }
}

/// Snapshot of every counter the service exports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceMetrics {
    pub sequence: CacheStats,
    pub location: LocationStats,
    pub content: ContentStats,
    pub staging: StagingStats,
    pub encoder: EncoderStats,
}

pub struct CacheService {
    config: CacheConfig,
    sequences: SequenceAllocator,
    locations: LocationIndex,
    content: ContentCache,
    staging: InsertStagingBuffer,
    encoder: EncodeScheduler,
}

impl CacheService {
    /// Validates `config` and sizes every component from it.
    pub fn new(config: CacheConfig) -> Result<Arc<Self>> {
        config.validate().context("invalid cache configuration")?;
        let service = Self {
            sequences: SequenceAllocator::with_budget_mb(config.sequence_cache_mb),
            locations: LocationIndex::with_budget_mb(config.location_cache_mb),
            content: ContentCache::with_budget_mb(
                config.content_cache_mb,
                config.content_max_entry_bytes,
            ),
            staging: InsertStagingBuffer::new(config.staging_slots),
            encoder: EncodeScheduler::new(config.num_encode_threads),
            config,
        };
        info!(
            sequence_cache_mb = service.config.sequence_cache_mb,
            location_cache_mb = service.config.location_cache_mb,
            content_cache_mb = service.config.content_cache_mb,
            staging_slots = service.config.staging_slots,
            encode_threads = service.config.num_encode_threads,
            "cache service started"
        );
        Ok(Arc::new(service))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn sequences(&self) -> &SequenceAllocator {
        &self.sequences
    }

    pub fn locations(&self) -> &LocationIndex {
        &self.locations
    }

    pub fn content(&self) -> &ContentCache {
        &self.content
    }

    pub fn staging(&self) -> &InsertStagingBuffer {
        &self.staging
    }

    pub fn encoder(&self) -> &EncodeScheduler {
        &self.encoder
    }

    /// Stops the encode pool. Caches stay usable and a later parallel batch
    /// starts a new pool.
    pub fn detach(&self) {
        self.encoder.shutdown();
        info!("cache service detached");
    }

    /// Removes every entry of `table` from every component.
    pub fn invalidate_table(&self, table: TableId) -> Invalidated {
        let dropped = Invalidated {
            sequences: self.sequences.invalidate(table),
            locations: self.locations.invalidate(table),
            contents: self.content.invalidate(table),
            staging_slots: self.staging.invalidate(table),
        };
        info!(table, entries = dropped.total(), "table invalidated");
        dropped
    }

    pub fn metrics(&self) -> ServiceMetrics {
        ServiceMetrics {
            sequence: self.sequences.stats(),
            location: self.locations.stats(),
            content: self.content.stats(),
            staging: self.staging.stats(),
            encoder: self.encoder.stats(),
        }
    }
}

impl fmt::Debug for CacheService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheService")
            .field("config", &self.config)
            .field("encoder", &self.encoder)
            .finish_non_exhaustive()
    }
}

fn write_cache(f: &mut fmt::Formatter<'_>, name: &str, s: &CacheStats) -> fmt::Result {
    writeln!(
        f,
        "{name:<10} capacity={} live={} hits={} misses={} evictions={}",
        s.capacity, s.live_entries, s.hits, s.misses, s.evictions
    )
}

impl fmt::Display for ServiceMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_cache(f, "sequence", &self.sequence)?;
        write_cache(f, "loc.fwd", &self.location.forward)?;
        write_cache(f, "loc.rev", &self.location.reverse)?;
        write_cache(f, "content", &self.content.cache)?;
        writeln!(
            f,
            "{:<10} resident={}B budget={}B oversized={}",
            "",
            self.content.resident_bytes,
            self.content.byte_budget,
            self.content.oversized_rejections
        )?;
        writeln!(
            f,
            "{:<10} slots={} claimed={} evicted_while_owned={} ownership_mismatches={}",
            "staging",
            self.staging.slots,
            self.staging.claimed,
            self.staging.evicted_while_owned,
            self.staging.ownership_mismatches
        )?;
        write!(
            f,
            "{:<10} threads={} parallel={} inline={} failed={}",
            "encoder",
            self.encoder.threads,
            self.encoder.parallel_batches,
            self.encoder.inline_batches,
            self.encoder.failed_candidates
        )
    }
}
