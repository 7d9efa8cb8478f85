// crates/conduit-config/src/config.rs
// ============================================================================
// Module: Conduit Configuration
// Description: Configuration loading and validation for Conduit servers.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, thiserror, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Resolution order is an explicit path, then `CONDUIT_CONFIG`, then
//! `conduit.toml` in the working directory; when none of these exist the
//! defaults apply. An explicitly named file that cannot be read is an error.
//!
//! Security posture: config inputs are untrusted. HTTP binds are limited to
//! loopback unless `allow_non_loopback` is set.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "conduit.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "CONDUIT_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default HTTP bind address.
pub(crate) const DEFAULT_BIND: &str = "127.0.0.1:7410";
/// Default maximum request body size in bytes.
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
/// Upper bound on the request body size.
pub(crate) const MAX_BODY_BYTES_LIMIT: usize = 64 * 1024 * 1024;
/// Default maximum inflight requests.
pub(crate) const DEFAULT_MAX_INFLIGHT: usize = 64;
/// Upper bound on inflight requests.
pub(crate) const MAX_INFLIGHT_LIMIT: usize = 4_096;
/// Maximum request timeout in milliseconds.
pub(crate) const MAX_REQUEST_TIMEOUT_MS: u64 = 10 * 60 * 1000;
/// Minimum allowed rate limit window in milliseconds.
pub(crate) const MIN_RATE_LIMIT_WINDOW_MS: u64 = 100;
/// Maximum allowed rate limit window in milliseconds.
pub(crate) const MAX_RATE_LIMIT_WINDOW_MS: u64 = 60_000;
/// Maximum allowed requests per rate limit window.
pub(crate) const MAX_RATE_LIMIT_REQUESTS: u32 = 100_000;
/// Maximum number of tracked rate limit entries.
pub(crate) const MAX_RATE_LIMIT_ENTRIES: usize = 65_536;
/// Default max requests per window when rate limiting is enabled.
pub(crate) const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 1_000;
/// Default rate limit window in milliseconds when enabled.
pub(crate) const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 1_000;
/// Default max tracked rate limit entries when enabled.
pub(crate) const DEFAULT_RATE_LIMIT_MAX_ENTRIES: usize = 4_096;
/// Default concurrently running batch items.
pub(crate) const DEFAULT_BATCH_MAX_CONCURRENT: usize = 4;
/// Default maximum items per batch.
pub(crate) const DEFAULT_BATCH_MAX_COMMANDS: usize = 100;
/// Upper bound on batch size.
pub(crate) const MAX_BATCH_COMMANDS: usize = 10_000;
/// Default maximum steps per pipeline.
pub(crate) const DEFAULT_PIPELINE_MAX_STEPS: usize = 50;
/// Upper bound on pipeline length.
pub(crate) const MAX_PIPELINE_STEPS: usize = 1_000;
/// Default retry count.
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;
/// Upper bound on retries.
pub(crate) const MAX_RETRIES_LIMIT: u32 = 10;
/// Default first backoff delay in milliseconds.
pub(crate) const DEFAULT_BASE_DELAY_MS: u64 = 200;
/// Default backoff cap in milliseconds.
pub(crate) const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
/// Default log filter directive.
pub(crate) const DEFAULT_LOG_LEVEL: &str = "info";

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Conduit server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConduitConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Batch executor defaults.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Pipeline executor limits.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Retry defaults for handlers calling upstream services.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Diagnostic logging.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// File the configuration was read from, if any (not deserialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl ConduitConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = env::var(CONFIG_ENV_VAR).ok();
        let Some(resolved) = resolve_path(path, env_path.as_deref())? else {
            let mut config = Self::default();
            config.validate()?;
            return Ok(config);
        };
        let mut config = Self::from_file(&resolved)?;
        config.source_path = Some(resolved);
        Ok(config)
    }

    /// Parses and validates a specific file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is unreadable, oversized, or
    /// invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        validate_path(path)?;
        let bytes = fs::read(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.batch.validate()?;
        self.pipeline.validate()?;
        self.retry.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Transport served by `conduit serve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerTransport {
    /// Newline-delimited JSON over stdin/stdout.
    #[default]
    Stdio,
    /// HTTP with SSE push.
    Http,
}

impl ServerTransport {
    /// Returns the config label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
        }
    }
}

/// Server transport and limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Transport to serve.
    #[serde(default)]
    pub transport: ServerTransport,
    /// HTTP bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Permit binding HTTP on a non-loopback address.
    #[serde(default)]
    pub allow_non_loopback: bool,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Maximum concurrently running requests.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    /// Default per-request deadline in milliseconds.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Include handler diagnostics in `INTERNAL_ERROR` details.
    #[serde(default)]
    pub expose_internal_errors: bool,
    /// Optional per-caller rate limiting.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Request audit logging.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: ServerTransport::default(),
            bind: default_bind(),
            allow_non_loopback: false,
            max_body_bytes: default_max_body_bytes(),
            max_inflight: default_max_inflight(),
            request_timeout_ms: None,
            expose_internal_errors: false,
            rate_limit: None,
            audit: AuditConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Returns the parsed bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the address does not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid bind address: {}", self.bind)))
    }

    /// Validates server transport configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 || self.max_body_bytes > MAX_BODY_BYTES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_body_bytes must be between 1 and {MAX_BODY_BYTES_LIMIT}"
            )));
        }
        if self.max_inflight == 0 || self.max_inflight > MAX_INFLIGHT_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_inflight must be between 1 and {MAX_INFLIGHT_LIMIT}"
            )));
        }
        if let Some(timeout) = self.request_timeout_ms
            && (timeout == 0 || timeout > MAX_REQUEST_TIMEOUT_MS)
        {
            return Err(ConfigError::Invalid(format!(
                "request_timeout_ms must be between 1 and {MAX_REQUEST_TIMEOUT_MS}"
            )));
        }
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }
        self.audit.validate()?;
        if self.transport == ServerTransport::Http {
            let addr = self.bind_addr()?;
            if !addr.ip().is_loopback() && !self.allow_non_loopback {
                return Err(ConfigError::Invalid(
                    "non-loopback bind requires allow_non_loopback = true".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Rate limit configuration for server requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Maximum requests per time window.
    #[serde(default = "default_rate_limit_max_requests")]
    pub max_requests: u32,
    /// Window duration in milliseconds.
    #[serde(default = "default_rate_limit_window_ms")]
    pub window_ms: u64,
    /// Maximum number of distinct rate limit entries.
    #[serde(default = "default_rate_limit_max_entries")]
    pub max_entries: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_max_requests(),
            window_ms: default_rate_limit_window_ms(),
            max_entries: default_rate_limit_max_entries(),
        }
    }
}

impl RateLimitConfig {
    /// Validates rate limit settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit max_requests must be greater than zero".to_string(),
            ));
        }
        if self.max_requests > MAX_RATE_LIMIT_REQUESTS {
            return Err(ConfigError::Invalid("rate_limit max_requests too large".to_string()));
        }
        if self.window_ms < MIN_RATE_LIMIT_WINDOW_MS || self.window_ms > MAX_RATE_LIMIT_WINDOW_MS {
            return Err(ConfigError::Invalid(format!(
                "rate_limit window_ms must be between {MIN_RATE_LIMIT_WINDOW_MS} and \
                 {MAX_RATE_LIMIT_WINDOW_MS}",
            )));
        }
        if self.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit max_entries must be greater than zero".to_string(),
            ));
        }
        if self.max_entries > MAX_RATE_LIMIT_ENTRIES {
            return Err(ConfigError::Invalid("rate_limit max_entries too large".to_string()));
        }
        Ok(())
    }
}

/// Request audit logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Enable structured audit logging.
    #[serde(default)]
    pub enabled: bool,
    /// Optional audit log path (JSON lines); stderr when absent.
    #[serde(default)]
    pub path: Option<String>,
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            validate_path_string("audit.path", path)?;
        }
        Ok(())
    }
}

/// Batch executor defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Concurrently running items when a request sets no options.
    #[serde(default = "default_batch_max_concurrent")]
    pub max_concurrent: usize,
    /// Maximum items per batch.
    #[serde(default = "default_batch_max_commands")]
    pub max_commands: usize,
    /// Keep starting items after a failure when a request sets no options.
    #[serde(default)]
    pub continue_on_error: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_batch_max_concurrent(),
            max_commands: default_batch_max_commands(),
            continue_on_error: false,
        }
    }
}

impl BatchConfig {
    /// Validates batch limits.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "batch.max_concurrent must be greater than zero".to_string(),
            ));
        }
        if self.max_commands == 0 || self.max_commands > MAX_BATCH_COMMANDS {
            return Err(ConfigError::Invalid(format!(
                "batch.max_commands must be between 1 and {MAX_BATCH_COMMANDS}"
            )));
        }
        Ok(())
    }
}

/// Pipeline executor limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Maximum steps per pipeline.
    #[serde(default = "default_pipeline_max_steps")]
    pub max_steps: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_pipeline_max_steps(),
        }
    }
}

impl PipelineConfig {
    /// Validates pipeline limits.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 || self.max_steps > MAX_PIPELINE_STEPS {
            return Err(ConfigError::Invalid(format!(
                "pipeline.max_steps must be between 1 and {MAX_PIPELINE_STEPS}"
            )));
        }
        Ok(())
    }
}

/// Retry defaults for upstream calls made by handlers.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Validates retry settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "retry.max_retries must be at most {MAX_RETRIES_LIMIT}"
            )));
        }
        if self.base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms must be at least retry.base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Diagnostic log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Diagnostic logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Validates logging settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.level must be non-empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path; `None` means no file applies.
fn resolve_path(
    path: Option<&Path>,
    env_path: Option<&str>,
) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = path {
        return Ok(Some(path.to_path_buf()));
    }
    if let Some(env_path) = env_path.filter(|value| !value.trim().is_empty()) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(Some(PathBuf::from(env_path)));
    }
    let default_path = PathBuf::from(DEFAULT_CONFIG_NAME);
    Ok(default_path.is_file().then_some(default_path))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Default HTTP bind address.
pub(crate) fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

/// Default maximum request body size in bytes.
pub(crate) const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Default maximum inflight requests.
pub(crate) const fn default_max_inflight() -> usize {
    DEFAULT_MAX_INFLIGHT
}

/// Default max requests per rate limit window.
pub(crate) const fn default_rate_limit_max_requests() -> u32 {
    DEFAULT_RATE_LIMIT_MAX_REQUESTS
}

/// Default rate limit window in milliseconds.
pub(crate) const fn default_rate_limit_window_ms() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_MS
}

/// Default max entries for rate limiting.
pub(crate) const fn default_rate_limit_max_entries() -> usize {
    DEFAULT_RATE_LIMIT_MAX_ENTRIES
}

/// Default concurrently running batch items.
pub(crate) const fn default_batch_max_concurrent() -> usize {
    DEFAULT_BATCH_MAX_CONCURRENT
}

/// Default maximum items per batch.
pub(crate) const fn default_batch_max_commands() -> usize {
    DEFAULT_BATCH_MAX_COMMANDS
}

/// Default maximum steps per pipeline.
pub(crate) const fn default_pipeline_max_steps() -> usize {
    DEFAULT_PIPELINE_MAX_STEPS
}

/// Default retry count.
pub(crate) const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Default first backoff delay.
pub(crate) const fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

/// Default backoff cap.
pub(crate) const fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

/// Default log filter directive.
pub(crate) fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use std::path::Path;
    use std::path::PathBuf;

    use super::resolve_path;

    #[test]
    fn explicit_path_wins_over_env() {
        let resolved = resolve_path(Some(Path::new("a.toml")), Some("b.toml")).unwrap();
        assert_eq!(resolved, Some(PathBuf::from("a.toml")));
        let resolved = resolve_path(None, Some("b.toml")).unwrap();
        assert_eq!(resolved, Some(PathBuf::from("b.toml")));
    }

    #[test]
    fn oversized_env_path_is_rejected() {
        let long = "x".repeat(5000);
        assert!(resolve_path(None, Some(&long)).is_err());
    }
}
