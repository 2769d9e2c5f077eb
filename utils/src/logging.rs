//! Structured logging initialization via `tracing`.

use tracing_subscriber::EnvFilter;

/// Initialize a plain tracing subscriber for tools and simulations.
///
/// Respects the `RUST_LOG` environment variable, falling back to `default_level`.
/// Calling it twice is harmless: the second installation attempt is ignored.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
