//! Tracing subscriber setup for the CLI
//!
//! Library code only emits `tracing` events; installing a subscriber is up
//! to the binary. Logs go to stderr so stdout stays free for the report and
//! `--json` event lines.

use tracing_subscriber::EnvFilter;

/// Pick the default filter directive for the given verbosity flags
pub fn default_directive(verbose: bool, quiet: bool) -> &'static str {
    if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the flags.
pub fn init_tracing(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, quiet)));

    // A second install (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
