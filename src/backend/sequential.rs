//! Single-threaded reference search

use std::time::Instant;

use super::{
    try_candidate, AttemptBudget, CancelToken, FailureStreak, Found, SearchConfig, SearchError,
    SearchOutcome,
};
use crate::keypair::KeyGenerator;
use crate::sink::{Progress, SearchSink};

/// Generates and tests one candidate at a time on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialBackend;

impl SequentialBackend {
    pub fn run(
        &self,
        config: &SearchConfig,
        generator: &dyn KeyGenerator,
        sink: &dyn SearchSink,
        cancel: &CancelToken,
    ) -> Result<SearchOutcome, SearchError> {
        sink.search_started(&config.prefix, config.max_attempts);

        let start_time = Instant::now();
        let mut failures = FailureStreak::new(config.max_consecutive_failures);
        let mut budget = AttemptBudget::new(config.max_attempts);

        loop {
            if cancel.is_cancelled() {
                return Err(SearchError::Stopped);
            }
            if config.past_deadline() {
                tracing::warn!(attempts = budget.attempts_made, "search deadline reached");
                break;
            }
            budget = match budget.next() {
                Some(next) => next,
                None => break,
            };

            if let Some((keypair, address)) =
                try_candidate(generator, &config.prefix, &mut failures)?
            {
                sink.search_succeeded(&address, budget.attempts_made);
                return Ok(SearchOutcome::Found(Found {
                    keypair,
                    address,
                    attempts: budget.attempts_made,
                }));
            }

            if config.progress_interval > 0 && budget.attempts_made % config.progress_interval == 0
            {
                let elapsed = start_time.elapsed().as_secs_f64();
                sink.attempt_progress(&Progress {
                    attempts: budget.attempts_made,
                    keys_per_sec: if elapsed > 0.0 {
                        budget.attempts_made as f64 / elapsed
                    } else {
                        0.0
                    },
                    elapsed_secs: elapsed,
                });
            }
        }

        sink.search_exhausted(budget.attempts_made);
        Ok(SearchOutcome::Exhausted {
            attempts: budget.attempts_made,
        })
    }
}
