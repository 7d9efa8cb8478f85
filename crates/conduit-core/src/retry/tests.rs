// crates/conduit-core/src/retry/tests.rs
// ============================================================================
// Module: Retry Tests
// Description: Backoff schedule, classification, and exhaustion behavior.
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions are permitted."
)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::ErrorCategory;
use super::RetryPolicy;
use super::RetryState;
use super::Sleeper;
use super::classify_message;
use super::classify_status;
use super::retry;
use crate::error::CommandError;
use crate::error::error_codes;

/// Records requested delays instead of sleeping.
#[derive(Default)]
struct RecordingSleeper {
    /// Delays in request order.
    delays: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn two_failures_then_success_sleeps_twice() {
    let sleeper = RecordingSleeper::default();
    let mut calls = 0;
    let value = retry(policy(), &sleeper, "fetch", |attempt| {
        calls += 1;
        async move {
            if attempt < 2 {
                Err(CommandError::network("connection reset"))
            } else {
                Ok(attempt)
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(value, 2);
    assert_eq!(calls, 3);
    assert_eq!(
        *sleeper.delays.lock().unwrap(),
        [Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[tokio::test]
async fn auth_failures_are_not_retried() {
    let sleeper = RecordingSleeper::default();
    let err = retry(policy(), &sleeper, "fetch", |_attempt| async {
        Err::<(), _>(CommandError::auth("bad key sk-secret"))
    })
    .await
    .unwrap_err();
    assert_eq!(err.attempts, 1);
    assert_eq!(err.category, ErrorCategory::Auth);
    assert!(sleeper.delays.lock().unwrap().is_empty());
    let command_error = err.into_command_error();
    assert_eq!(command_error.code, error_codes::AUTH_ERROR);
    assert!(!command_error.message.contains("sk-secret"));
}

#[tokio::test]
async fn exhaustion_surfaces_the_last_category() {
    let sleeper = RecordingSleeper::default();
    let err = retry(policy(), &sleeper, "generate", |_attempt| async {
        Err::<(), _>(CommandError::timeout("generate", 30_000))
    })
    .await
    .unwrap_err();
    assert_eq!(err.attempts, 4);
    assert_eq!(sleeper.delays.lock().unwrap().len(), 3);
    assert_eq!(err.user_message(), ErrorCategory::Timeout.user_message());
    let command_error = err.into_command_error();
    assert_eq!(command_error.code, error_codes::TIMEOUT);
    assert_eq!(command_error.retryable, Some(true));
}

#[test]
fn delays_double_and_cap() {
    let policy = RetryPolicy {
        max_retries: 40,
        base_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(2),
    };
    assert_eq!(policy.delay_for(0), Duration::from_millis(250));
    assert_eq!(policy.delay_for(2), Duration::from_secs(1));
    assert_eq!(policy.delay_for(3), Duration::from_secs(2));
    assert_eq!(policy.delay_for(39), Duration::from_secs(2));
}

#[test]
fn state_stops_at_the_retry_limit() {
    let mut state = RetryState::new(RetryPolicy {
        max_retries: 2,
        ..policy()
    });
    assert!(state.next_delay(ErrorCategory::Upstream).is_some());
    assert!(state.next_delay(ErrorCategory::RateLimited).is_some());
    assert!(state.next_delay(ErrorCategory::Network).is_none());
    assert_eq!(state.retries(), 2);
    let mut fresh = RetryState::new(policy());
    assert!(fresh.next_delay(ErrorCategory::Unknown).is_none());
}

#[test]
fn statuses_and_messages_classify() {
    assert_eq!(classify_status(429), ErrorCategory::RateLimited);
    assert_eq!(classify_status(401), ErrorCategory::Auth);
    assert_eq!(classify_status(504), ErrorCategory::Timeout);
    assert_eq!(classify_status(503), ErrorCategory::Upstream);
    assert_eq!(classify_status(404), ErrorCategory::Unknown);
    assert_eq!(classify_message("Too Many Requests"), ErrorCategory::RateLimited);
    assert_eq!(classify_message("request timed out"), ErrorCategory::Timeout);
    assert_eq!(classify_message("Connection refused"), ErrorCategory::Network);
    assert_eq!(classify_message("model overloaded"), ErrorCategory::Upstream);
    assert_eq!(classify_message("weird"), ErrorCategory::Unknown);
}
