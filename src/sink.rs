//! Search event reporting
//!
//! The search loop never logs directly; it reports through a [`SearchSink`]
//! supplied by the caller.

use std::fmt;
use std::time::Duration;

use tracing::info;

use crate::backend::Prefix;
use crate::onion::OnionAddress;

/// Progress snapshot reported at a fixed attempt cadence
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub attempts: u64,
    pub keys_per_sec: f64,
    pub elapsed_secs: f64,
}

/// Receiver of search lifecycle events.
///
/// Called from worker threads; implementations must not block.
pub trait SearchSink: Send + Sync {
    fn search_started(&self, prefix: &Prefix, max_attempts: u64);
    fn attempt_progress(&self, progress: &Progress);
    fn search_succeeded(&self, address: &OnionAddress, attempts: u64);
    fn search_exhausted(&self, attempts: u64);
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl SearchSink for NullSink {
    fn search_started(&self, _: &Prefix, _: u64) {}
    fn attempt_progress(&self, _: &Progress) {}
    fn search_succeeded(&self, _: &OnionAddress, _: u64) {}
    fn search_exhausted(&self, _: u64) {}
}

/// Sink that writes events as `tracing` records
#[derive(Debug, Default, Clone)]
pub struct TracingSink {
    expected_attempts: std::sync::OnceLock<f64>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SearchSink for TracingSink {
    fn search_started(&self, prefix: &Prefix, max_attempts: u64) {
        let expected = prefix.expected_attempts() as f64;
        let _ = self.expected_attempts.set(expected);
        info!(
            prefix = %prefix,
            max_attempts,
            expected = %format!("{:.2e}", expected),
            "generating vanity onion address"
        );
    }

    fn attempt_progress(&self, progress: &Progress) {
        let expected = self.expected_attempts.get().copied().unwrap_or(0.0);
        let eta = if progress.keys_per_sec > 0.0 && expected > progress.attempts as f64 {
            (expected - progress.attempts as f64) / progress.keys_per_sec
        } else {
            0.0
        };

        info!(
            attempts = progress.attempts,
            speed = %format!("{}/s", format_speed(progress.keys_per_sec as u64)),
            elapsed = %PrettyDur::from_secs_f64(progress.elapsed_secs),
            eta = %PrettyDur::from_secs_f64(eta),
            "attempted {} keys so far",
            progress.attempts
        );
    }

    fn search_succeeded(&self, address: &OnionAddress, attempts: u64) {
        info!(%address, attempts, "found vanity address after {} attempts", attempts);
    }

    fn search_exhausted(&self, attempts: u64) {
        info!(attempts, "no matching address after {} attempts", attempts);
    }
}

const MAX_DISPLAY_SECS: f64 = 1e15;

/// Human readable duration, e.g. "2 hours, 5 minutes, 3 seconds"
pub struct PrettyDur(chrono::Duration);

impl PrettyDur {
    pub fn from_secs_f64(secs: f64) -> Self {
        // chrono tops out near 2.9e8 years
        let std = if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs.min(MAX_DISPLAY_SECS))
        } else {
            Duration::ZERO
        };
        Self(chrono::Duration::from_std(std).unwrap_or_else(|_| chrono::Duration::zero()))
    }
}

impl fmt::Display for PrettyDur {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.num_weeks() >= 52 {
            write!(f, "{} years, ", self.0.num_weeks() / 52)?;
        }
        if self.0.num_weeks() % 52 > 0 {
            write!(f, "{} weeks, ", self.0.num_weeks() % 52)?;
        }
        if self.0.num_days() % 7 > 0 {
            write!(f, "{} days, ", self.0.num_days() % 7)?;
        }
        if self.0.num_hours() % 24 > 0 {
            write!(f, "{} hours, ", self.0.num_hours() % 24)?;
        }
        if self.0.num_minutes() % 60 > 0 {
            write!(f, "{} minutes, ", self.0.num_minutes() % 60)?;
        }
        write!(f, "{} seconds", self.0.num_seconds() % 60)
    }
}

/// Format a key rate for display
pub fn format_speed(speed: u64) -> String {
    if speed >= 1_000_000_000 {
        format!("{:.1}B", speed as f64 / 1_000_000_000.0)
    } else if speed >= 1_000_000 {
        format!("{:.1}M", speed as f64 / 1_000_000.0)
    } else if speed >= 1_000 {
        format!("{:.1}K", speed as f64 / 1_000.0)
    } else {
        format!("{}", speed)
    }
}
