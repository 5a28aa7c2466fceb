//! Logging setup
//!
//! Structured logging with tracing, written to stderr so stdout carries
//! only the resulting address.

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "hs_vanity=info";

/// Initialize logging.
///
/// An explicit `level` wins; otherwise `RUST_LOG` applies, falling back to
/// info for this crate.
pub fn init(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(format!("hs_vanity={}", level)),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}
