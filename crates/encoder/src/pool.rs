//! Worker threads and the batch they share.
//!
//! ```text
//! submitter                         worker i
//! ---------                         --------
//! state.batch_seq += 1              wait until batch_seq changes
//! state.current = batch             clone state.current
//! notify_all ---------------------> claim: next.fetch_add(1)
//! claim: next.fetch_add(1)            encode, results[i].set(..)
//!   ...                               completed.fetch_add(1)
//! spin until completed == len
//! fence(Acquire), read results
//! ```
//!
//! Workers only ever run `Codec::encode` on bytes owned by the batch; they
//! touch nothing else.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use codec::Codec;
use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::EncodeTask;

/// One `execute` call's worth of candidates.
pub(crate) struct Batch {
    codec: Arc<dyn Codec>,
    target: Arc<[u8]>,
    extra_pass: bool,
    tasks: Vec<EncodeTask>,
    next: AtomicUsize,
    completed: AtomicUsize,
    results: Vec<OnceLock<Option<Vec<u8>>>>,
    panics: AtomicU64,
}

impl Batch {
    pub(crate) fn new(
        codec: Arc<dyn Codec>,
        target: Arc<[u8]>,
        extra_pass: bool,
        tasks: Vec<EncodeTask>,
    ) -> Self {
        let results = (0..tasks.len()).map(|_| OnceLock::new()).collect();
        Self {
            codec,
            target,
            extra_pass,
            tasks,
            next: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            results,
            panics: AtomicU64::new(0),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Claims and runs tasks until none are left.
    pub(crate) fn run_claims(&self) {
        loop {
            let i = self.next.fetch_add(1, Ordering::AcqRel);
            if i >= self.tasks.len() {
                return;
            }
            let task = &self.tasks[i];
            let encoded = catch_unwind(AssertUnwindSafe(|| {
                self.codec
                    .encode(task.tag, &task.base, &self.target, self.extra_pass)
            }))
            .unwrap_or_else(|_| {
                self.panics.fetch_add(1, Ordering::Relaxed);
                None
            });
            let _ = self.results[i].set(encoded);
            self.completed.fetch_add(1, Ordering::Release);
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire) >= self.tasks.len()
    }

    pub(crate) fn tasks(&self) -> &[EncodeTask] {
        &self.tasks
    }

    pub(crate) fn result(&self, i: usize) -> Option<&Vec<u8>> {
        self.results[i].get().and_then(Option::as_ref)
    }

    pub(crate) fn panics(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }
}

struct PoolState {
    batch_seq: u64,
    current: Option<Arc<Batch>>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    wake: Condvar,
}

/// Running worker threads.
pub(crate) struct Pool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Pool {
    /// Spawns `threads` workers. Fails if the OS refuses a thread; workers
    /// spawned so far are stopped again.
    pub(crate) fn start(threads: usize) -> std::io::Result<Pool> {
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                batch_seq: 0,
                current: None,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });
        let mut pool = Pool {
            shared,
            workers: Vec::with_capacity(threads),
        };
        for id in 0..threads {
            let shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(format!("encode-{id}"))
                .spawn(move || worker_loop(&shared));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(err) => {
                    pool.stop();
                    return Err(err);
                }
            }
        }
        info!(threads, "encode pool started");
        Ok(pool)
    }

    pub(crate) fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Publishes `batch` to the workers.
    pub(crate) fn announce(&self, batch: &Arc<Batch>) {
        let mut state = self.shared.state.lock();
        state.batch_seq += 1;
        state.current = Some(Arc::clone(batch));
        self.shared.wake.notify_all();
    }

    /// Withdraws the finished batch so late workers do not pick it up.
    pub(crate) fn retire(&self) {
        self.shared.state.lock().current = None;
    }

    /// Sets the shutdown flag, wakes every worker and joins them.
    pub(crate) fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.current = None;
            self.shared.wake.notify_all();
        }
        let threads = self.workers.len();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("encode worker exited with a panic");
            }
        }
        info!(threads, "encode pool stopped");
    }
}

fn worker_loop(shared: &Shared) {
    block_signals();
    let mut seen = 0;
    loop {
        let batch = {
            let mut state = shared.state.lock();
            while state.batch_seq == seen && !state.shutdown {
                shared.wake.wait(&mut state);
            }
            if state.shutdown {
                return;
            }
            seen = state.batch_seq;
            state.current.clone()
        };
        if let Some(batch) = batch {
            batch.run_claims();
        }
    }
}

#[cfg(unix)]
fn block_signals() {
    use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow};

    if let Err(err) = pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&SigSet::all()), None) {
        warn!(%err, "could not mask signals in encode worker");
    }
}

#[cfg(not(unix))]
fn block_signals() {}
