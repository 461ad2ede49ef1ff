//! # Config - DeltaChain Settings
//!
//! Two layers of read-only configuration:
//!
//! - [`DeltaConfig`] is per table: how many predecessors a new version may
//!   diff against, how often a keyframe is forced, and whether the codec runs
//!   its extra pass.
//! - [`CacheConfig`] is per process: memory budgets of the shared caches,
//!   the staging-buffer slot count and the encode pool size.
//!
//! Both can be built with chained setters or loaded from `DELTACHAIN_*`
//! environment variables:
//!
//! ```text
//! DELTACHAIN_DEPTH              diff candidates per insert     (default: 3)
//! DELTACHAIN_KEYFRAME_EVERY     force a keyframe every N seqs  (default: 0 = never)
//! DELTACHAIN_EXTRA_PASS         codec extra pass               (default: false)
//! DELTACHAIN_SEQ_CACHE_MB       sequence cache budget          (default: 4)
//! DELTACHAIN_LOCATION_CACHE_MB  location index budget          (default: 8)
//! DELTACHAIN_CONTENT_CACHE_MB   decoded content budget         (default: 64)
//! DELTACHAIN_CONTENT_MAX_ENTRY  largest cacheable value, bytes (default: 1 MiB)
//! DELTACHAIN_STAGING_SLOTS      staging-buffer slots           (default: 1024)
//! DELTACHAIN_ENCODE_THREADS     encode worker threads          (default: 4, 0 = inline)
//! ```
use std::str::FromStr;

use thiserror::Error;

/// Largest supported diff depth.
pub const MAX_DEPTH: usize = 32;

/// Largest supported encode pool.
pub const MAX_ENCODE_THREADS: usize = 64;

const MIB: usize = 1024 * 1024;

/// Errors produced while building or validating configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `depth` outside `1..=MAX_DEPTH`.
    #[error("depth must be in 1..={MAX_DEPTH}, got {0}")]
    InvalidDepth(usize),

    /// Encode pool larger than `MAX_ENCODE_THREADS`.
    #[error("num_encode_threads must be <= {MAX_ENCODE_THREADS}, got {0}")]
    TooManyThreads(usize),

    /// The staging buffer needs at least one slot.
    #[error("staging_slots must be > 0")]
    NoStagingSlots,

    /// An environment variable could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
}

/// Per-table delta compression settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaConfig {
    /// Number of most recent predecessors tried as diff bases (default: 3).
    pub depth: usize,

    /// Force a keyframe whenever `(seq - 1) % keyframe_every == 0`
    /// (default: 0, never forced beyond the first version).
    pub keyframe_every: u64,

    /// Let the codec spend an extra pass looking for a smaller encoding
    /// (default: false).
    pub enable_extra_pass: bool,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            depth: 3,
            keyframe_every: 0,
            enable_extra_pass: false,
        }
    }
}

impl DeltaConfig {
    /// Set diff depth
    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Set forced keyframe interval
    pub fn keyframe_every(mut self, every: u64) -> Self {
        self.keyframe_every = every;
        self
    }

    /// Enable the codec extra pass
    pub fn enable_extra_pass(mut self, enabled: bool) -> Self {
        self.enable_extra_pass = enabled;
        self
    }

    /// Returns `true` if the version numbered `seq` must be stored as a
    /// keyframe regardless of available bases.
    #[must_use]
    pub fn forces_keyframe(&self, seq: u64) -> bool {
        seq <= 1 || (self.keyframe_every > 0 && (seq - 1) % self.keyframe_every == 0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.depth == 0 || self.depth > MAX_DEPTH {
            return Err(ConfigError::InvalidDepth(self.depth));
        }
        Ok(())
    }

    /// Loads the table settings from `DELTACHAIN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the table settings through `lookup`, falling back to defaults for
    /// unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            depth: parse_or(&lookup, "DELTACHAIN_DEPTH", defaults.depth)?,
            keyframe_every: parse_or(&lookup, "DELTACHAIN_KEYFRAME_EVERY", defaults.keyframe_every)?,
            enable_extra_pass: parse_or(
                &lookup,
                "DELTACHAIN_EXTRA_PASS",
                defaults.enable_extra_pass,
            )?,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Process-wide cache and worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Budget of the sequence allocator cache in MiB (default: 4).
    pub sequence_cache_mb: usize,

    /// Budget of the location index, both directions together, in MiB
    /// (default: 8).
    pub location_cache_mb: usize,

    /// Budget of the decoded content cache in MiB (default: 64).
    pub content_cache_mb: usize,

    /// Values larger than this are never cached (default: 1 MiB).
    pub content_max_entry_bytes: usize,

    /// Number of staging-buffer slots (default: 1024).
    pub staging_slots: usize,

    /// Encode worker threads; 0 runs every batch inline (default: 4).
    pub num_encode_threads: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sequence_cache_mb: 4,
            location_cache_mb: 8,
            content_cache_mb: 64,
            content_max_entry_bytes: MIB,
            staging_slots: 1024,
            num_encode_threads: 4,
        }
    }
}

impl CacheConfig {
    /// Set sequence cache budget
    pub fn sequence_cache_mb(mut self, mb: usize) -> Self {
        self.sequence_cache_mb = mb;
        self
    }

    /// Set location index budget
    pub fn location_cache_mb(mut self, mb: usize) -> Self {
        self.location_cache_mb = mb;
        self
    }

    /// Set content cache budget
    pub fn content_cache_mb(mut self, mb: usize) -> Self {
        self.content_cache_mb = mb;
        self
    }

    /// Set the per-entry ceiling of the content cache
    pub fn content_max_entry_bytes(mut self, bytes: usize) -> Self {
        self.content_max_entry_bytes = bytes;
        self
    }

    /// Set staging-buffer slot count
    pub fn staging_slots(mut self, slots: usize) -> Self {
        self.staging_slots = slots;
        self
    }

    /// Set encode pool size
    pub fn num_encode_threads(mut self, threads: usize) -> Self {
        self.num_encode_threads = threads;
        self
    }

    /// Content cache budget in bytes.
    #[must_use]
    pub fn content_cache_bytes(&self) -> usize {
        self.content_cache_mb.saturating_mul(MIB)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.staging_slots == 0 {
            return Err(ConfigError::NoStagingSlots);
        }
        if self.num_encode_threads > MAX_ENCODE_THREADS {
            return Err(ConfigError::TooManyThreads(self.num_encode_threads));
        }
        Ok(())
    }

    /// Loads the process settings from `DELTACHAIN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the process settings through `lookup`, falling back to defaults
    /// for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let config = Self {
            sequence_cache_mb: parse_or(&lookup, "DELTACHAIN_SEQ_CACHE_MB", d.sequence_cache_mb)?,
            location_cache_mb: parse_or(
                &lookup,
                "DELTACHAIN_LOCATION_CACHE_MB",
                d.location_cache_mb,
            )?,
            content_cache_mb: parse_or(&lookup, "DELTACHAIN_CONTENT_CACHE_MB", d.content_cache_mb)?,
            content_max_entry_bytes: parse_or(
                &lookup,
                "DELTACHAIN_CONTENT_MAX_ENTRY",
                d.content_max_entry_bytes,
            )?,
            staging_slots: parse_or(&lookup, "DELTACHAIN_STAGING_SLOTS", d.staging_slots)?,
            num_encode_threads: parse_or(
                &lookup,
                "DELTACHAIN_ENCODE_THREADS",
                d.num_encode_threads,
            )?,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Converts a MiB budget into an entry count given the estimated footprint of
/// one entry. A zero budget yields a zero (disabled) capacity.
#[must_use]
pub fn capacity_for_budget(mb: usize, entry_bytes: usize) -> usize {
    mb.saturating_mul(MIB) / entry_bytes.max(1)
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value: raw,
        }),
    }
}
