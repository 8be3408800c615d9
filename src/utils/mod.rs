//! Utilities: logging setup (level from -v / -q, RUST_LOG overrides) and
//! a couple of environment helpers shared by the subcommands.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Logging helpers.
pub mod logging {
    use super::*;

    /// -q -> errors only, default -> warnings, -v -> info, -vv -> debug, more -> trace.
    pub fn derive_level(verbose: u8, quiet: bool) -> LevelFilter {
        if quiet {
            return LevelFilter::ERROR;
        }
        match verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    /// Install the global subscriber. Diagnostics go to stderr so `--json`
    /// output on stdout stays machine readable.
    pub fn init_logging(level: LevelFilter) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));
        // A second init (tests) is harmless; keep the first subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}

pub use logging::{derive_level, init_logging};

/// Read an environment variable, treating blank values as unset.
pub fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}
