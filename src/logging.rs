//! Diagnostic logging setup shared by both binaries.
//!
//! Logs go to stderr; stdout may be carrying the binary log or CSV.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Level selected by `--verbose[=0|1]`: absent is info, `0` errors only,
/// anything else debug.
pub fn level(verbose: Option<u8>) -> LevelFilter {
    match verbose {
        None => LevelFilter::INFO,
        Some(0) => LevelFilter::ERROR,
        Some(_) => LevelFilter::DEBUG,
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the verbosity flag.
///
/// Calling this twice leaves the first subscriber in place.
pub fn init(verbose: Option<u8>) {
    let filter = EnvFilter::builder()
        .with_default_directive(level(verbose).into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
