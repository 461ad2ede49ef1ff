/// Point-in-time counters of one bounded cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Maximum number of live entries.
    pub capacity: usize,
    /// Entries currently resident.
    pub live_entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries displaced to make room for new ones.
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, or `0.0` before the first lookup.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
