// crates/conduit-server/src/logging.rs
// ============================================================================
// Module: Diagnostic Logging
// Description: tracing subscriber setup for server processes.
// Purpose: Route diagnostics to stderr so stdout stays a clean response channel.
// Dependencies: conduit-config, tracing-subscriber
// ============================================================================

//! ## Overview
//! The stdio transport owns stdout for response framing, so every diagnostic
//! goes to stderr regardless of transport. `RUST_LOG` overrides the
//! configured filter when set.

// ============================================================================
// SECTION: Imports
// ============================================================================

use conduit_config::LogFormat;
use conduit_config::LoggingConfig;
use tracing_subscriber::EnvFilter;

use crate::error::ServerError;

// ============================================================================
// SECTION: Setup
// ============================================================================

/// Builds the filter from `RUST_LOG`, falling back to the configured level.
///
/// # Errors
///
/// Returns [`ServerError::Config`] when the configured directive is invalid.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ServerError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(config.level.trim())
        .map_err(|err| ServerError::Config(format!("invalid logging.level: {err}")))
}

/// Installs the global subscriber writing to stderr.
///
/// Calling this more than once keeps the first subscriber.
///
/// # Errors
///
/// Returns [`ServerError::Config`] when the log filter is invalid.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ServerError> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
