//! Logging setup for hosts embedding the engine.
//!
//! The engine itself only emits `tracing` events; installing a subscriber is
//! left to the host. These helpers install a plain console subscriber:
//! - Output to stderr
//! - Configurable via the RUST_LOG environment variable (default `info`)

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Default filter directive when RUST_LOG is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the console subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn try_init_logging() -> Result<(), TryInitError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()
}

/// Install the console subscriber, ignoring an already installed one.
pub fn init_logging() {
    let _ = try_init_logging();
}
