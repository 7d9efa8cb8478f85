//! Config defaults and loading tests for conduit-config.
// crates/conduit-config/tests/config_defaults.rs
// =============================================================================
// Module: Config Defaults and Loading Tests
// Description: Validate defaults, file loading, and size limits.
// Purpose: Ensure a minimal config is valid and loading fails closed.
// =============================================================================

use std::fs;

use conduit_config::ConduitConfig;
use conduit_config::ConfigError;
use conduit_config::LogFormat;
use conduit_config::ServerTransport;

mod common;
use common::TestResult;

#[test]
fn default_config_validates() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;
    if config.server.transport != ServerTransport::Stdio {
        return Err("transport should default to stdio".to_string());
    }
    if config.server.bind != "127.0.0.1:7410" {
        return Err(format!("unexpected default bind {}", config.server.bind));
    }
    if config.server.max_body_bytes != 1024 * 1024 || config.server.max_inflight != 64 {
        return Err("unexpected server limits".to_string());
    }
    if config.batch.max_concurrent != 4 || config.batch.max_commands != 100 {
        return Err("unexpected batch defaults".to_string());
    }
    if config.pipeline.max_steps != 50 {
        return Err("unexpected pipeline defaults".to_string());
    }
    if config.retry.max_retries != 3 || config.retry.base_delay_ms != 200 {
        return Err("unexpected retry defaults".to_string());
    }
    if config.server.expose_internal_errors || config.server.audit.enabled {
        return Err("diagnostic exposure and audit must default to off".to_string());
    }
    Ok(())
}

#[test]
fn full_file_loads_from_disk() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("conduit.toml");
    fs::write(
        &path,
        r#"
[server]
transport = "http"
bind = "127.0.0.1:9000"
max_inflight = 8
request_timeout_ms = 5000

[server.rate_limit]
max_requests = 10
window_ms = 1000

[server.audit]
enabled = true

[batch]
max_concurrent = 2
continue_on_error = true

[logging]
level = "debug"
format = "json"
"#,
    )
    .map_err(|err| err.to_string())?;
    let config = ConduitConfig::load(Some(&path)).map_err(|err| err.to_string())?;
    if config.server.transport != ServerTransport::Http || config.server.max_inflight != 8 {
        return Err("server section not applied".to_string());
    }
    if config.server.rate_limit.as_ref().map(|limit| limit.max_entries) != Some(4_096) {
        return Err("rate limit defaults not applied".to_string());
    }
    if !config.batch.continue_on_error || config.logging.format != LogFormat::Json {
        return Err("batch or logging section not applied".to_string());
    }
    if config.source_path.as_deref() != Some(path.as_path()) {
        return Err("source path not recorded".to_string());
    }
    Ok(())
}

#[test]
fn oversized_file_is_rejected() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("big.toml");
    let filler = format!("# {}\n", "x".repeat(1024));
    fs::write(&path, filler.repeat(1100)).map_err(|err| err.to_string())?;
    match ConduitConfig::load(Some(&path)) {
        Err(ConfigError::Invalid(message)) if message.contains("size limit") => Ok(()),
        other => Err(format!("expected size limit error, got {:?}", other.map(|_| ()))),
    }
}

#[test]
fn missing_explicit_file_is_an_io_error() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    match ConduitConfig::load(Some(&dir.path().join("absent.toml"))) {
        Err(ConfigError::Io(_)) => Ok(()),
        other => Err(format!("expected io error, got {:?}", other.map(|_| ()))),
    }
}

#[test]
fn unknown_keys_fail_to_parse() -> TestResult {
    match ConduitConfig::from_toml_str("[server]\nmax_inflgiht = 4\n") {
        Err(ConfigError::Parse(_)) => Ok(()),
        other => Err(format!("expected parse error, got {:?}", other.map(|_| ()))),
    }
}
