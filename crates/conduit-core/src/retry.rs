// crates/conduit-core/src/retry.rs
// ============================================================================
// Module: Retry and Backoff
// Description: Failure classification and exponential backoff for upstream calls.
// Purpose: Let handlers call unreliable dependencies with bounded retries.
// Dependencies: async-trait, serde_json, thiserror, tokio, tracing
// ============================================================================

//! ## Overview
//! [`retry`] wraps one async operation. Each failure is classified into an
//! [`ErrorCategory`]; only rate-limited, network, timeout, and upstream
//! failures are retried. Delays follow `base * 2^attempt`, capped at
//! `max_delay`, for at most `max_retries` retries.
//!
//! Backoff is an explicit [`RetryState`] machine, and sleeping goes through
//! the [`Sleeper`] trait so tests drive it without wall-clock delays.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::context::duration_millis;
use crate::error::CommandError;
use crate::error::error_codes;

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Failure category driving the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The dependency throttled the caller.
    RateLimited,
    /// Credentials were missing or rejected.
    Auth,
    /// The dependency was unreachable.
    Network,
    /// The dependency did not answer in time.
    Timeout,
    /// The dependency failed server-side.
    Upstream,
    /// Anything else.
    Unknown,
}

impl ErrorCategory {
    /// Returns true for categories worth retrying.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Network | Self::Timeout | Self::Upstream)
    }

    /// Returns a stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Auth => "auth",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Upstream => "upstream",
            Self::Unknown => "unknown",
        }
    }

    /// Returns the command error code for this category.
    #[must_use]
    pub const fn error_code(self) -> &'static str {
        match self {
            Self::RateLimited => error_codes::RATE_LIMITED,
            Self::Auth => error_codes::AUTH_ERROR,
            Self::Network => error_codes::NETWORK_ERROR,
            Self::Timeout => error_codes::TIMEOUT,
            Self::Upstream => error_codes::UPSTREAM_ERROR,
            Self::Unknown => error_codes::INTERNAL_ERROR,
        }
    }

    /// Returns a message safe to show to end users.
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::RateLimited => "The upstream service is busy. Please try again shortly.",
            Self::Auth => "The upstream service rejected our credentials.",
            Self::Network => "The upstream service could not be reached.",
            Self::Timeout => "The upstream service took too long to respond.",
            Self::Upstream => "The upstream service is having problems.",
            Self::Unknown => "The request could not be completed.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that know their retry category.
pub trait Classify {
    /// Returns the category of this failure.
    fn category(&self) -> ErrorCategory;
}

impl Classify for CommandError {
    fn category(&self) -> ErrorCategory {
        match self.code.as_str() {
            error_codes::RATE_LIMITED => ErrorCategory::RateLimited,
            error_codes::AUTH_ERROR => ErrorCategory::Auth,
            error_codes::NETWORK_ERROR => ErrorCategory::Network,
            error_codes::TIMEOUT => ErrorCategory::Timeout,
            error_codes::UPSTREAM_ERROR => ErrorCategory::Upstream,
            _ => ErrorCategory::Unknown,
        }
    }
}

/// Classifies an HTTP status code.
#[must_use]
pub const fn classify_status(status: u16) -> ErrorCategory {
    match status {
        429 => ErrorCategory::RateLimited,
        401 | 403 => ErrorCategory::Auth,
        408 | 504 => ErrorCategory::Timeout,
        500 ..= 599 => ErrorCategory::Upstream,
        _ => ErrorCategory::Unknown,
    }
}

/// Classifies a free-form error message by well-known phrases.
#[must_use]
pub fn classify_message(message: &str) -> ErrorCategory {
    let lowered = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|needle| lowered.contains(needle));
    if has(&["rate limit", "too many requests", "429"]) {
        ErrorCategory::RateLimited
    } else if has(&["unauthorized", "forbidden", "invalid api key", "401", "403"]) {
        ErrorCategory::Auth
    } else if has(&["timed out", "timeout", "deadline"]) {
        ErrorCategory::Timeout
    } else if has(&["connection", "network", "dns", "unreachable", "reset by peer"]) {
        ErrorCategory::Network
    } else if has(&[
        "overloaded",
        "internal server error",
        "bad gateway",
        "unavailable",
        "502",
        "503",
    ]) {
        ErrorCategory::Upstream
    } else {
        ErrorCategory::Unknown
    }
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Default retry count.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default first backoff delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);
/// Default delay cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Retry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Returns the delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.checked_mul(factor).unwrap_or(self.max_delay).min(self.max_delay)
    }
}

/// Explicit backoff state machine.
///
/// # Invariants
/// - `retries` never exceeds `policy.max_retries`.
#[derive(Debug, Clone, Copy)]
pub struct RetryState {
    /// Limits.
    policy: RetryPolicy,
    /// Retries granted so far.
    retries: u32,
}

impl RetryState {
    /// Starts a fresh state.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retries: 0,
        }
    }

    /// Returns the number of retries granted so far.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }

    /// Records a failure and returns the delay before the next attempt, or
    /// `None` when the failure is final.
    pub fn next_delay(&mut self, category: ErrorCategory) -> Option<Duration> {
        if !category.is_retryable() || self.retries >= self.policy.max_retries {
            return None;
        }
        let delay = self.policy.delay_for(self.retries);
        self.retries += 1;
        Some(delay)
    }
}

// ============================================================================
// SECTION: Sleeping
// ============================================================================

/// Suspends the caller between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Waits for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// ============================================================================
// SECTION: Retry
// ============================================================================

/// Final failure after retries were exhausted or refused.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempt(s) ({category}): {last_error}")]
pub struct RetryError<E: fmt::Display> {
    /// Operation label.
    pub operation: String,
    /// Category of the last failure.
    pub category: ErrorCategory,
    /// Calls made, including the first.
    pub attempts: u32,
    /// Raw last failure, for diagnostics only.
    pub last_error: E,
}

impl<E: fmt::Display> RetryError<E> {
    /// Returns the user-safe message.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        self.category.user_message()
    }

    /// Converts into a caller-facing command error without the raw message.
    #[must_use]
    pub fn into_command_error(self) -> CommandError {
        CommandError::new(self.category.error_code(), self.category.user_message())
            .with_retryable(self.category.is_retryable())
            .with_details(json!({
                "operation": self.operation,
                "attempts": self.attempts,
                "category": self.category.as_str(),
            }))
    }
}

/// Runs `op` until it succeeds or a failure is final.
///
/// `op` receives the zero-based attempt number.
///
/// # Errors
///
/// Returns [`RetryError`] carrying the last classified failure.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
    operation: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Classify + fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut state = RetryState::new(policy);
    let mut attempt = 0_u32;
    loop {
        let failure = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(failure) => failure,
        };
        attempt += 1;
        let category = failure.category();
        let Some(delay) = state.next_delay(category) else {
            tracing::warn!(
                operation,
                attempts = attempt,
                category = category.as_str(),
                error = %failure,
                "giving up"
            );
            return Err(RetryError {
                operation: operation.to_string(),
                category,
                attempts: attempt,
                last_error: failure,
            });
        };
        tracing::warn!(
            operation,
            attempt,
            category = category.as_str(),
            delay_ms = duration_millis(delay),
            error = %failure,
            "retrying after failure"
        );
        sleeper.sleep(delay).await;
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
