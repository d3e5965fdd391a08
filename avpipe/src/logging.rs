//! Tracing subscriber setup for applications embedding avpipe.

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Failure to install the global subscriber.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid filter directive: {0}")]
    Directive(String),

    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Install a fmt subscriber filtered by `RUST_LOG`, or by `default_directive`
/// (e.g. `"avpipe=debug"`) when the variable is unset.
///
/// Returns an error instead of panicking if a global subscriber exists.
pub fn init_tracing(default_directive: &str) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .map_err(|e| LoggingError::Directive(e.to_string()))?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .try_init()
        .map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))
}
