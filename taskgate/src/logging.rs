//! Diagnostic tracing for the taskgate CLI.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. Command results
//! (task summaries, diffs, JSON reports) go to stdout and are unaffected.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `taskgate=info` so step progress and
/// rollback warnings are visible. `verbose` raises the default to `debug`.
///
/// # Example
/// ```bash
/// RUST_LOG=taskgate=trace taskgate run --goal "add logging"
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "taskgate=debug" } else { "taskgate=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
