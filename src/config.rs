//! Runtime configuration
//!
//! Every option can come from the command line or from the environment,
//! which is how container deployments drive it.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::{Prefix, PrefixError, SearchConfig, DEFAULT_MAX_CONSECUTIVE_FAILURES};
use crate::store::{KeyStore, SecretKeyFormat};

/// Tor v3 vanity hidden service key generator
#[derive(Parser, Debug, Clone)]
#[command(name = "hs-vanity", author, version, about, long_about = None)]
pub struct Config {
    /// Wanted address prefix (base32: a-z, 2-7)
    #[arg(short, long, env = "ONION_PREFIX", default_value = "san")]
    pub prefix: String,

    /// Give up after this many keys
    #[arg(short = 'n', long, env = "MAX_ATTEMPTS", default_value_t = 1_000_000)]
    pub max_attempts: u64,

    /// Hidden service directory to install the key into
    #[arg(short = 'd', long, env = "HS_DIR", default_value = "/var/lib/tor/hidden_service")]
    pub hs_dir: PathBuf,

    /// Number of worker threads (default: number of CPU cores)
    #[arg(short, long, env = "HS_VANITY_THREADS")]
    pub threads: Option<usize>,

    /// Abort after this many key generation failures in a row
    #[arg(long, env = "HS_VANITY_MAX_FAILURES", default_value_t = DEFAULT_MAX_CONSECUTIVE_FAILURES)]
    pub max_consecutive_failures: u32,

    /// Stop searching after this many seconds
    #[arg(long, env = "HS_VANITY_TIMEOUT")]
    pub timeout_secs: Option<u64>,

    /// Store Tor's 64-byte expanded secret instead of the 32-byte seed
    #[arg(long)]
    pub expanded_secret: bool,

    /// Log level for this crate (overrides RUST_LOG)
    #[arg(long, env = "HS_VANITY_LOG")]
    pub log_level: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid prefix: {0}")]
    InvalidPrefix(#[from] PrefixError),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Returns the number of workers, defaulting to CPU count
    pub fn worker_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }

    pub fn prefix(&self) -> Result<Prefix, ConfigError> {
        Ok(Prefix::new(&self.prefix)?)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.prefix()?;

        if self.worker_count() == 0 {
            return Err(ConfigError::InvalidValue(
                "thread count must be at least 1".into(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::InvalidValue(
                "max consecutive failures must be at least 1".into(),
            ));
        }
        if self.hs_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue(
                "hidden service directory cannot be empty".into(),
            ));
        }

        Ok(())
    }

    /// Search parameters derived from this configuration
    pub fn search_config(&self) -> Result<SearchConfig, ConfigError> {
        let mut search = SearchConfig::new(self.prefix()?, self.max_attempts)
            .with_max_consecutive_failures(self.max_consecutive_failures);
        if let Some(secs) = self.timeout_secs {
            search = search.with_timeout(Duration::from_secs(secs));
        }
        Ok(search)
    }

    pub fn key_store(&self) -> KeyStore {
        let format = if self.expanded_secret {
            SecretKeyFormat::Expanded
        } else {
            SecretKeyFormat::Seed
        };
        KeyStore::in_dir(&self.hs_dir).with_format(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("hs-vanity").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_explicit_values() {
        let config = parse(&[
            "--prefix",
            "RADIO",
            "--max-attempts",
            "500",
            "--hs-dir",
            "/tmp/hs",
            "--threads",
            "3",
            "--timeout-secs",
            "60",
            "--expanded-secret",
        ]);
        assert!(config.validate().is_ok());
        assert_eq!(config.prefix().unwrap().as_str(), "radio");
        assert_eq!(config.worker_count(), 3);

        let search = config.search_config().unwrap();
        assert_eq!(search.max_attempts, 500);
        assert!(search.deadline.is_some());

        let store = config.key_store();
        assert_eq!(store.hostname_path(), std::path::Path::new("/tmp/hs/hostname"));
    }

    #[test]
    fn test_invalid_prefix() {
        let config = parse(&["--prefix", "s@n"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPrefix(PrefixError::InvalidChar(_)))
        ));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = parse(&["--prefix", "abc", "--threads", "0"]);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_zero_failure_threshold_rejected() {
        let config = parse(&["--prefix", "abc", "--max-consecutive-failures", "0"]);
        assert!(config.validate().is_err());
    }
}
