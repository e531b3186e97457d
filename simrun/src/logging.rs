//! Diagnostic tracing for simrun.
//!
//! Stdout carries command output (reports, verdicts); everything emitted here
//! goes to stderr so the two never interleave in pipes.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset, which still surfaces
/// best-effort stage failures and the existing-directory warning.
///
/// # Example
/// ```bash
/// RUST_LOG=simrun=debug simrun run job.toml
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
