//! Limits validation tests for conduit-config.
// crates/conduit-config/tests/limits_validation.rs
// =============================================================================
// Module: Limits Validation Tests
// Description: Validate server, rate limit, batch, pipeline, and retry bounds.
// Purpose: Ensure out-of-range limits fail closed.
// =============================================================================

use conduit_config::RateLimitConfig;
use conduit_config::ServerTransport;

mod common;
use common::TestResult;
use common::assert_invalid;

#[test]
fn zero_inflight_is_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.server.max_inflight = 0;
    assert_invalid(config.validate(), "max_inflight must be between")
}

#[test]
fn zero_request_timeout_is_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.server.request_timeout_ms = Some(0);
    assert_invalid(config.validate(), "request_timeout_ms must be between")
}

#[test]
fn rate_limit_window_bounds_are_enforced() -> TestResult {
    let mut config = common::config_with_rate_limit(RateLimitConfig {
        window_ms: 10,
        ..RateLimitConfig::default()
    })
    .map_err(|err| err.to_string())?;
    assert_invalid(config.validate(), "rate_limit window_ms must be between")
}

#[test]
fn rate_limit_requires_requests() -> TestResult {
    let mut config = common::config_with_rate_limit(RateLimitConfig {
        max_requests: 0,
        ..RateLimitConfig::default()
    })
    .map_err(|err| err.to_string())?;
    assert_invalid(config.validate(), "max_requests must be greater than zero")
}

#[test]
fn non_loopback_http_bind_requires_opt_in() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.server.transport = ServerTransport::Http;
    config.server.bind = "0.0.0.0:7410".to_string();
    assert_invalid(config.validate(), "allow_non_loopback")?;
    config.server.allow_non_loopback = true;
    config.validate().map_err(|err| err.to_string())
}

#[test]
fn invalid_bind_is_rejected_for_http() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.server.transport = ServerTransport::Http;
    config.server.bind = "localhost".to_string();
    assert_invalid(config.validate(), "invalid bind address")
}

#[test]
fn batch_limits_are_enforced() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.batch.max_concurrent = 0;
    assert_invalid(config.validate(), "batch.max_concurrent")?;
    config.batch.max_concurrent = 2;
    config.batch.max_commands = 0;
    assert_invalid(config.validate(), "batch.max_commands")
}

#[test]
fn pipeline_step_limit_is_enforced() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.pipeline.max_steps = 0;
    assert_invalid(config.validate(), "pipeline.max_steps")?;
    config.pipeline.max_steps = 1_001;
    assert_invalid(config.validate(), "pipeline.max_steps")
}

#[test]
fn retry_delays_must_be_ordered() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.retry.base_delay_ms = 500;
    config.retry.max_delay_ms = 100;
    assert_invalid(config.validate(), "retry.max_delay_ms")?;
    config.retry.max_delay_ms = 500;
    config.retry.max_retries = 11;
    assert_invalid(config.validate(), "retry.max_retries")
}

#[test]
fn empty_audit_path_is_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.server.audit.path = Some("  ".to_string());
    assert_invalid(config.validate(), "audit.path must be non-empty")
}
