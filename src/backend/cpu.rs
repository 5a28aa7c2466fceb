//! CPU backend using Rayon for parallel processing

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use super::{
    try_candidate, CancelToken, FailureStreak, Found, SearchConfig, SearchError, SearchOutcome,
};
use crate::keypair::KeyGenerator;
use crate::sink::{Progress, SearchSink};

/// CPU backend racing independent workers for the first match
#[derive(Debug, Clone)]
pub struct CpuBackend {
    thread_count: usize,
}

/// State shared by every worker of one search
struct Shared {
    /// Attempt tickets handed out so far; may overshoot the budget by at
    /// most one per worker
    claimed: AtomicU64,
    /// Set once a worker has committed the winning pair
    winner: AtomicBool,
    /// Tells workers to stop at their next check
    stop: AtomicBool,
    winner_tx: Sender<Found>,
    error: Mutex<Option<SearchError>>,
    start_time: Instant,
}

impl Shared {
    fn attempts(&self, max_attempts: u64) -> u64 {
        self.claimed.load(Ordering::SeqCst).min(max_attempts)
    }

    fn fail(&self, error: SearchError) {
        self.stop.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.error.lock() {
            slot.get_or_insert(error);
        }
    }
}

impl CpuBackend {
    /// Create a new CPU backend using all available cores
    pub fn new() -> Self {
        Self::with_threads(num_cpus::get())
    }

    /// Create a CPU backend with a specific thread count
    pub fn with_threads(thread_count: usize) -> Self {
        Self {
            thread_count: thread_count.max(1),
        }
    }

    pub fn threads(&self) -> usize {
        self.thread_count
    }

    /// Run the search on a dedicated pool.
    ///
    /// Exactly one worker can commit a winner; every other candidate is
    /// dropped inside its worker and never leaves it.
    pub fn run(
        &self,
        config: &SearchConfig,
        generator: &dyn KeyGenerator,
        sink: &dyn SearchSink,
        cancel: &CancelToken,
    ) -> Result<SearchOutcome, SearchError> {
        sink.search_started(&config.prefix, config.max_attempts);

        if config.max_attempts == 0 {
            sink.search_exhausted(0);
            return Ok(SearchOutcome::Exhausted { attempts: 0 });
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.thread_count)
            .thread_name(|i| format!("vanity-worker-{}", i))
            .build()
            .map_err(|e| SearchError::ThreadPool(e.to_string()))?;

        let (winner_tx, winner_rx): (Sender<Found>, Receiver<Found>) = bounded(1);
        let shared = Shared {
            claimed: AtomicU64::new(0),
            winner: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            winner_tx,
            error: Mutex::new(None),
            start_time: Instant::now(),
        };

        pool.scope(|s| {
            for id in 0..self.thread_count {
                let shared = &shared;
                s.spawn(move |_| {
                    let local = worker(id, shared, config, generator, sink, cancel);
                    tracing::debug!(worker = id, attempts = local, "worker finished");
                });
            }
        });

        if let Ok(found) = winner_rx.try_recv() {
            sink.search_succeeded(&found.address, found.attempts);
            return Ok(SearchOutcome::Found(found));
        }

        let error = shared.error.lock().ok().and_then(|mut slot| slot.take());
        if let Some(error) = error {
            return Err(error);
        }

        let attempts = shared.attempts(config.max_attempts);
        sink.search_exhausted(attempts);
        Ok(SearchOutcome::Exhausted { attempts })
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// One worker's loop; returns how many attempts this worker made
fn worker(
    id: usize,
    shared: &Shared,
    config: &SearchConfig,
    generator: &dyn KeyGenerator,
    sink: &dyn SearchSink,
    cancel: &CancelToken,
) -> u64 {
    let mut failures = FailureStreak::new(config.max_consecutive_failures);
    let mut local = 0u64;

    loop {
        if shared.stop.load(Ordering::Relaxed) {
            return local;
        }
        if cancel.is_cancelled() {
            shared.fail(SearchError::Stopped);
            return local;
        }
        if config.past_deadline() {
            tracing::warn!(worker = id, "search deadline reached");
            shared.stop.store(true, Ordering::SeqCst);
            return local;
        }

        let ticket = shared.claimed.fetch_add(1, Ordering::Relaxed);
        if ticket >= config.max_attempts {
            return local;
        }
        let attempt = ticket + 1;
        local += 1;

        match try_candidate(generator, &config.prefix, &mut failures) {
            Ok(Some((keypair, address))) => {
                if shared
                    .winner
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    shared.stop.store(true, Ordering::SeqCst);
                    let attempts = shared.attempts(config.max_attempts);
                    // Capacity 1 and a single committed winner, so this never blocks
                    let _ = shared.winner_tx.send(Found {
                        keypair,
                        address,
                        attempts,
                    });
                }
                return local;
            }
            Ok(None) => {}
            Err(e) => {
                shared.fail(e);
                return local;
            }
        }

        if config.progress_interval > 0 && attempt % config.progress_interval == 0 {
            let elapsed = shared.start_time.elapsed().as_secs_f64();
            sink.attempt_progress(&Progress {
                attempts: attempt,
                keys_per_sec: if elapsed > 0.0 {
                    attempt as f64 / elapsed
                } else {
                    0.0
                },
                elapsed_secs: elapsed,
            });
        }
    }
}
