//! Tor v3 vanity hidden service key generator CLI
//!
//! Prints the installed `.onion` hostname on stdout. Exit status:
//! 0 found or reused, 1 error, 2 no match within the budget, 130 interrupted.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use hs_vanity::{
    logging, select_backend, CancelToken, Config, Existing, OsKeyGenerator, SearchError,
    SearchOutcome, TracingSink,
};

const EXIT_ERROR: u8 = 1;
const EXIT_NOT_FOUND: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    let config = Config::parse();
    logging::init(config.log_level.as_deref());

    if let Err(e) = config.validate() {
        error!("configuration error: {}", e);
        return ExitCode::from(EXIT_ERROR);
    }

    match run(&config) {
        Ok(Some(hostname)) => {
            println!("{}", hostname);
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::from(EXIT_NOT_FOUND),
        Err(RunError::Search(SearchError::Stopped)) => {
            warn!("generation stopped by user");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Config(#[from] hs_vanity::ConfigError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("failed to install hidden service key: {0}")]
    Persistence(#[from] hs_vanity::PersistenceError),
}

/// Reuse or generate the key; `None` means the search ran out of attempts
fn run(config: &Config) -> Result<Option<String>, RunError> {
    let prefix = config.prefix()?;
    let store = config.key_store();

    match store.check_existing(&prefix)? {
        Existing::Match(hostname) => {
            info!(%hostname, "using existing vanity address");
            return Ok(Some(hostname));
        }
        Existing::Mismatch(hostname) => {
            info!(
                %hostname,
                %prefix,
                "existing address can't be reused, generating new one"
            );
        }
        Existing::NotFound => {}
    }

    let backend = select_backend(config.worker_count());
    info!(backend = %backend.name(), hs_dir = %config.hs_dir.display(), "starting search");

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nStopping...");
        handler_token.cancel();
    }) {
        warn!("could not install Ctrl-C handler: {}", e);
    }

    let search = config.search_config()?;
    let outcome = backend.run(&search, &OsKeyGenerator, &TracingSink::new(), &cancel)?;

    match outcome {
        SearchOutcome::Found(found) => {
            let hostname = found.address.hostname();
            store.persist(found.keypair, &found.address)?;
            Ok(Some(hostname))
        }
        SearchOutcome::Exhausted { attempts } => {
            warn!(
                %prefix,
                attempts,
                "could not find vanity address with prefix '{}' after {} attempts",
                prefix,
                attempts
            );
            Ok(None)
        }
    }
}
