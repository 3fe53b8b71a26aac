// ABOUTME: Tracing subscriber setup for the parley binary.
// ABOUTME: RUST_LOG wins over the configured filter; output goes to stderr so stdout stays conversational.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Safe to call more than once; later calls are no-ops.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
