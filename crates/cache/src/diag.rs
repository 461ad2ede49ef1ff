//! Rate-limited diagnostics.
//!
//! Conditions such as an oversized cache value or a stolen staging slot can
//! fire on every row of a bulk load. Each condition owns a process-wide
//! [`LogOnce`] latch so it is reported at most once per process; the matching
//! metrics counter keeps the full tally.
use std::sync::atomic::{AtomicBool, Ordering};

/// One-shot latch guarding a diagnostic message.
#[derive(Debug, Default)]
pub struct LogOnce {
    fired: AtomicBool,
}

impl LogOnce {
    pub const fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// Returns `true` exactly once, for the first caller.
    pub fn first(&self) -> bool {
        !self.fired.swap(true, Ordering::Relaxed)
    }

    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Relaxed)
    }
}

/// Emits a `tracing::warn!` the first time `$latch` is hit.
#[macro_export]
macro_rules! warn_once {
    ($latch:expr, $($arg:tt)+) => {
        if $latch.first() {
            ::tracing::warn!($($arg)+);
        }
    };
}
