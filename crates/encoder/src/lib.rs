//! # Encoder - Parallel Candidate Selection
//!
//! For every delta column the insert path has up to `depth` candidate bases
//! plus a keyframe. Each candidate is one pure `Codec::encode` call; the
//! [`EncodeScheduler`] runs them side by side and keeps the smallest record.
//!
//! ## Dispatch
//!
//! A fixed-size worker pool is spawned on the first batch with more than one
//! candidate and kept until [`shutdown`]. Batches are announced through a
//! mutex/condvar pair and a batch sequence number; the submitting thread then
//! claims tasks alongside the workers from one shared atomic counter, waits
//! for a second counter to reach the task count, and reads the results.
//!
//! A batch runs inline on the caller's thread when it has a single task, the
//! pool is disabled (`threads == 0`) or cannot be started, or another
//! submitter currently owns the pool.
//!
//! ## Selection
//!
//! The smallest record wins; on equal size the smaller tag (the closer base,
//! a shorter chain to walk later) wins, and [`Tag::Keyframe`] sorts first.
//! Failed or panicking candidates drop out; if all of them do, the keyframe
//! fallback is returned.
//!
//! [`shutdown`]: EncodeScheduler::shutdown
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;

use codec::{Codec, Tag};
use parking_lot::Mutex;
use tracing::{debug, warn};

mod pool;

use pool::{Batch, Pool};

/// One diff candidate: encode the target against `base` under `tag`.
#[derive(Debug, Clone)]
pub struct EncodeTask {
    pub tag: Tag,
    pub base: Arc<[u8]>,
}

/// An encoded delta record and the tag it was encoded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    pub tag: Tag,
    pub bytes: Vec<u8>,
}

impl EncodedRecord {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn rank(&self) -> (usize, Tag) {
        (self.bytes.len(), self.tag)
    }
}

/// Encodes `target` as a keyframe, the fallback every batch is given.
pub fn keyframe(codec: &dyn Codec, target: &[u8], extra_pass: bool) -> Option<EncodedRecord> {
    codec
        .encode(Tag::Keyframe, &[], target, extra_pass)
        .map(|bytes| EncodedRecord {
            tag: Tag::Keyframe,
            bytes,
        })
}

/// Counters exported on the metrics surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderStats {
    pub threads: usize,
    pub pool_running: bool,
    pub parallel_batches: u64,
    pub inline_batches: u64,
    pub failed_candidates: u64,
    pub panicked_candidates: u64,
}

/// Lazily started worker pool evaluating diff candidates in parallel.
pub struct EncodeScheduler {
    threads: usize,
    pool: Mutex<Option<Pool>>,
    parallel_batches: AtomicU64,
    inline_batches: AtomicU64,
    failed_candidates: AtomicU64,
    panicked_candidates: AtomicU64,
}

impl EncodeScheduler {
    /// `threads == 0` disables the pool; every batch then runs inline.
    pub fn new(threads: usize) -> Self {
        Self {
            threads,
            pool: Mutex::new(None),
            parallel_batches: AtomicU64::new(0),
            inline_batches: AtomicU64::new(0),
            failed_candidates: AtomicU64::new(0),
            panicked_candidates: AtomicU64::new(0),
        }
    }

    /// Encodes `target` against every candidate and returns the smallest
    /// record, or `fallback` if no candidate beats it or all of them fail.
    pub fn execute(
        &self,
        codec: &Arc<dyn Codec>,
        target: Arc<[u8]>,
        candidates: Vec<EncodeTask>,
        fallback: EncodedRecord,
        extra_pass: bool,
    ) -> EncodedRecord {
        if candidates.is_empty() {
            return fallback;
        }
        let batch = Arc::new(Batch::new(Arc::clone(codec), target, extra_pass, candidates));

        if !self.run_parallel(&batch) {
            batch.run_claims();
            self.inline_batches.fetch_add(1, Ordering::Relaxed);
        }
        self.select(&batch, fallback)
    }

    /// Runs `batch` on the pool. Returns `false` if the caller has to run it
    /// inline instead.
    fn run_parallel(&self, batch: &Arc<Batch>) -> bool {
        if batch.len() < 2 || self.threads == 0 {
            return false;
        }
        let Some(mut pool) = self.pool.try_lock() else {
            return false;
        };
        if pool.is_none() {
            match Pool::start(self.threads) {
                Ok(started) => *pool = Some(started),
                Err(err) => {
                    warn!(%err, "could not start encode pool; encoding inline");
                    return false;
                }
            }
        }
        let Some(pool) = pool.as_ref() else {
            return false;
        };

        pool.announce(batch);
        batch.run_claims();
        while !batch.is_complete() {
            std::thread::yield_now();
        }
        fence(Ordering::Acquire);
        pool.retire();
        self.parallel_batches.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn select(&self, batch: &Batch, fallback: EncodedRecord) -> EncodedRecord {
        let mut best = fallback;
        let mut failed = 0;
        for (i, task) in batch.tasks().iter().enumerate() {
            match batch.result(i) {
                Some(bytes) => {
                    if (bytes.len(), task.tag) < best.rank() {
                        best = EncodedRecord {
                            tag: task.tag,
                            bytes: bytes.clone(),
                        };
                    }
                }
                None => failed += 1,
            }
        }
        if failed > 0 {
            self.failed_candidates.fetch_add(failed, Ordering::Relaxed);
            debug!(failed, "encode candidates failed");
        }
        let panics = batch.panics();
        if panics > 0 {
            self.panicked_candidates.fetch_add(panics, Ordering::Relaxed);
            warn!(panics, "codec panicked while encoding; candidate dropped");
        }
        best
    }

    /// Stops the pool and joins its workers. The next parallel batch starts
    /// a fresh pool.
    pub fn shutdown(&self) {
        if let Some(mut pool) = self.pool.lock().take() {
            pool.stop();
        }
    }

    pub fn stats(&self) -> EncoderStats {
        let pool_running = self
            .pool
            .try_lock()
            .map_or(true, |pool| pool.as_ref().is_some_and(|p| p.threads() > 0));
        EncoderStats {
            threads: self.threads,
            pool_running,
            parallel_batches: self.parallel_batches.load(Ordering::Relaxed),
            inline_batches: self.inline_batches.load(Ordering::Relaxed),
            failed_candidates: self.failed_candidates.load(Ordering::Relaxed),
            panicked_candidates: self.panicked_candidates.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for EncodeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodeScheduler")
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

impl Drop for EncodeScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
