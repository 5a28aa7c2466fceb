//! Vanity search backends
//!
//! A backend repeatedly generates keypairs, derives their onion address and
//! stops at the first one whose address starts with the wanted prefix, or
//! when the attempt budget runs out.

mod cpu;
mod sequential;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::keypair::{KeyGenerationError, KeyGenerator, KeyPair};
use crate::onion::{OnionAddress, ADDRESS_LEN, VERSION};
use crate::sink::SearchSink;

pub use cpu::CpuBackend;
pub use sequential::SequentialBackend;

/// Attempts between two progress reports
pub const PROGRESS_INTERVAL: u64 = 10_000;

/// Default number of back-to-back key generation failures tolerated
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 1_000;

/// Errors that end a search without a result
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("key generation failed {consecutive} times in a row: {source}")]
    KeyGeneration {
        consecutive: u32,
        #[source]
        source: KeyGenerationError,
    },

    #[error("generation stopped by user")]
    Stopped,

    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

/// Rejected prefix
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrefixError {
    #[error("empty prefix not allowed")]
    Empty,

    #[error("'{0}' is not a valid base32 prefix")]
    InvalidChar(String),

    #[error("prefix is longer than an onion address ({0} > 56 characters)")]
    TooLong(usize),
}

/// A validated, lower-cased base32 prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Prefix(String);

impl Prefix {
    pub fn new(prefix: &str) -> Result<Self, PrefixError> {
        let prefix = prefix.trim().to_ascii_lowercase();
        if prefix.is_empty() {
            return Err(PrefixError::Empty);
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c))
        {
            return Err(PrefixError::InvalidChar(prefix));
        }
        if prefix.len() > ADDRESS_LEN {
            return Err(PrefixError::TooLong(prefix.len()));
        }
        Ok(Self(prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive prefix test against address text
    #[inline]
    pub fn matches(&self, address: &str) -> bool {
        address
            .as_bytes()
            .get(..self.0.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(self.0.as_bytes()))
    }

    /// Mean number of attempts to hit this prefix: 32^len
    pub fn expected_attempts(&self) -> u64 {
        32u64.saturating_pow(self.0.len() as u32)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attempts made against a fixed ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptBudget {
    pub max_attempts: u64,
    pub attempts_made: u64,
}

impl AttemptBudget {
    pub fn new(max_attempts: u64) -> Self {
        Self {
            max_attempts,
            attempts_made: 0,
        }
    }

    /// The budget after one more attempt, or `None` when it is spent
    pub fn next(self) -> Option<Self> {
        if self.is_exhausted() {
            None
        } else {
            Some(Self {
                attempts_made: self.attempts_made + 1,
                ..self
            })
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }
}

/// Cooperative stop signal, checked once per attempt
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Search parameters
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub prefix: Prefix,
    pub max_attempts: u64,
    pub max_consecutive_failures: u32,
    /// Wall-clock cut-off; reaching it ends the search as exhausted
    pub deadline: Option<Instant>,
    pub progress_interval: u64,
}

impl SearchConfig {
    pub fn new(prefix: Prefix, max_attempts: u64) -> Self {
        Self {
            prefix,
            max_attempts,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            deadline: None,
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_max_consecutive_failures(mut self, failures: u32) -> Self {
        self.max_consecutive_failures = failures;
        self
    }

    fn past_deadline(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// The winning candidate
#[derive(Debug)]
pub struct Found {
    pub keypair: KeyPair,
    pub address: OnionAddress,
    pub attempts: u64,
}

/// How a search ended
#[derive(Debug)]
pub enum SearchOutcome {
    Found(Found),
    /// Budget or deadline reached without a match. Not an error.
    Exhausted { attempts: u64 },
}

impl SearchOutcome {
    pub fn attempts(&self) -> u64 {
        match self {
            SearchOutcome::Found(found) => found.attempts,
            SearchOutcome::Exhausted { attempts } => *attempts,
        }
    }
}

/// Available search backends
#[derive(Debug, Clone)]
pub enum Backend {
    Sequential(SequentialBackend),
    Cpu(CpuBackend),
}

impl Backend {
    pub fn name(&self) -> String {
        match self {
            Backend::Sequential(_) => "sequential".to_string(),
            Backend::Cpu(b) => format!("CPU ({} threads)", b.threads()),
        }
    }

    pub fn run(
        &self,
        config: &SearchConfig,
        generator: &dyn KeyGenerator,
        sink: &dyn SearchSink,
        cancel: &CancelToken,
    ) -> Result<SearchOutcome, SearchError> {
        match self {
            Backend::Sequential(b) => b.run(config, generator, sink, cancel),
            Backend::Cpu(b) => b.run(config, generator, sink, cancel),
        }
    }
}

/// One worker thread searches sequentially; more fan out over a pool
pub fn select_backend(threads: usize) -> Backend {
    if threads <= 1 {
        Backend::Sequential(SequentialBackend)
    } else {
        Backend::Cpu(CpuBackend::with_threads(threads))
    }
}

/// Tracks back-to-back key generation failures for one worker
#[derive(Debug)]
struct FailureStreak {
    limit: u32,
    current: u32,
}

impl FailureStreak {
    fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            current: 0,
        }
    }

    fn reset(&mut self) {
        self.current = 0;
    }

    /// Record a failure; errors once the streak reaches the limit
    fn record(&mut self, error: KeyGenerationError) -> Result<(), SearchError> {
        self.current += 1;
        tracing::debug!(consecutive = self.current, %error, "key generation failed");
        if self.current >= self.limit {
            return Err(SearchError::KeyGeneration {
                consecutive: self.current,
                source: error,
            });
        }
        Ok(())
    }
}

/// Generate one candidate and test it.
///
/// Returns the pair only on a prefix match; non-matching keys are dropped
/// (and zeroized) here.
#[inline]
fn try_candidate(
    generator: &dyn KeyGenerator,
    prefix: &Prefix,
    failures: &mut FailureStreak,
) -> Result<Option<(KeyPair, OnionAddress)>, SearchError> {
    let keypair = match generator.generate() {
        Ok(keypair) => keypair,
        Err(e) => {
            failures.record(e)?;
            return Ok(None);
        }
    };
    failures.reset();

    let address = OnionAddress::derive(keypair.public_bytes(), VERSION);
    if prefix.matches(address.as_str()) {
        Ok(Some((keypair, address)))
    } else {
        Ok(None)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_validation() {
        assert_eq!(Prefix::new("SAN").unwrap().as_str(), "san");
        assert_eq!(Prefix::new(""), Err(PrefixError::Empty));
        assert!(matches!(Prefix::new("s1n"), Err(PrefixError::InvalidChar(_))));
        assert!(matches!(Prefix::new("abc-"), Err(PrefixError::InvalidChar(_))));
        assert_eq!(
            Prefix::new(&"a".repeat(57)),
            Err(PrefixError::TooLong(57))
        );
    }

    #[test]
    fn test_prefix_matches_case_insensitive() {
        let prefix = Prefix::new("SAN").unwrap();
        assert!(prefix.matches("sanxyz"));
        assert!(prefix.matches("SANxyz"));
        assert!(!prefix.matches("xsan"));
        assert!(!prefix.matches("sa"));
    }

    #[test]
    fn test_expected_attempts() {
        assert_eq!(Prefix::new("a").unwrap().expected_attempts(), 32);
        assert_eq!(Prefix::new("san").unwrap().expected_attempts(), 32_768);
        assert_eq!(
            Prefix::new(&"a".repeat(20)).unwrap().expected_attempts(),
            u64::MAX
        );
    }

    #[test]
    fn test_attempt_budget() {
        let budget = AttemptBudget::new(2);
        let one = budget.next().unwrap();
        let two = one.next().unwrap();
        assert_eq!(two.attempts_made, 2);
        assert!(two.is_exhausted());
        assert!(two.next().is_none());
        assert!(AttemptBudget::new(0).next().is_none());
    }

    #[test]
    fn test_failure_streak() {
        let mut streak = FailureStreak::new(2);
        assert!(streak.record(KeyGenerationError("x".into())).is_ok());
        streak.reset();
        assert!(streak.record(KeyGenerationError("x".into())).is_ok());
        assert!(matches!(
            streak.record(KeyGenerationError("x".into())),
            Err(SearchError::KeyGeneration { consecutive: 2, .. })
        ));
    }

    #[test]
    fn test_select_backend() {
        assert!(matches!(select_backend(1), Backend::Sequential(_)));
        assert!(matches!(select_backend(4), Backend::Cpu(_)));
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
