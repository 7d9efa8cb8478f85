// crates/conduit-config/src/lib.rs
// ============================================================================
// Module: Conduit Config Library
// Description: Canonical config model, loading, and validation.
// Purpose: Single source of truth for conduit.toml semantics.
// Dependencies: serde, thiserror, toml
// ============================================================================

//! ## Overview
//! `conduit-config` defines the configuration model for Conduit servers and
//! the CLI. It provides strict, fail-closed validation with bounded limits.
//!
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
