// crates/conduit-cli/src/lib.rs
// ============================================================================
// Module: Conduit CLI Library
// Description: Client, session, argument, and lint helpers for the CLI.
// Purpose: Keep the `conduit` binary thin and its pieces testable.
// Dependencies: reqwest, dirs, jsonschema, conduit-core
// ============================================================================

//! ## Overview
//! The `conduit` binary is a consumer of the HTTP transport. This library
//! holds the parts it is built from so they can be tested in isolation.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod args;
pub mod client;
pub mod session;
pub mod validate;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use client::ClientError;
pub use client::ConduitClient;
pub use session::Session;
