// crates/conduit-server/src/error.rs
// ============================================================================
// Module: Server Errors
// Description: Failure modes of server assembly and transports.
// Purpose: Keep process-level failures apart from command-level results.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Command failures never surface here; they travel as failed
//! [`conduit_core::CommandResult`] values. [`ServerError`] covers only the
//! conditions that stop a server from starting or keep a transport from
//! moving bytes.

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ServerError {
    /// Returns a stable label for audit records.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Init(_) => "init",
            Self::Transport(_) => "transport",
        }
    }
}
