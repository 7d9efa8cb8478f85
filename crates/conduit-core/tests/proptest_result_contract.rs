//! Result contract property-based tests.
//!
//! ## What is covered
//! - Every encoded result carries exactly one of `data` and `error`.
//! - Fully populated results survive an encode/decode cycle unchanged.
//! - Arbitrary JSON objects never decode into a result that breaks the
//!   exclusivity rule.
// crates/conduit-core/tests/proptest_result_contract.rs
// ============================================================================
// Module: Result Contract Property-Based Tests
// Description: Randomized checks of the data/error exclusivity invariant.
// Purpose: Keep the wire form of results stable under arbitrary content.
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use conduit_core::Alternative;
use conduit_core::CommandError;
use conduit_core::CommandResult;
use conduit_core::PlanStep;
use conduit_core::PlanStepStatus;
use conduit_core::ResultMetadata;
use conduit_core::Source;
use conduit_core::SourceType;
use conduit_core::Warning;
use conduit_core::WarningSeverity;
use proptest::prelude::*;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,12}".prop_map(Value::from),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    json_leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0 .. 4).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0 .. 4)
                .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn command_error() -> impl Strategy<Value = CommandError> {
    ("[A-Z_]{3,16}", "[ -~]{0,40}", proptest::option::of("[ -~]{0,20}"), any::<Option<bool>>())
        .prop_map(|(code, message, suggestion, retryable)| {
            let mut error = CommandError::new(code, message);
            if let Some(suggestion) = suggestion {
                error = error.with_suggestion(suggestion);
            }
            if let Some(retryable) = retryable {
                error = error.with_retryable(retryable);
            }
            error
        })
}

fn result() -> impl Strategy<Value = CommandResult> {
    prop_oneof![
        json_value().prop_map(CommandResult::success),
        command_error().prop_map(CommandResult::failure),
    ]
}

proptest! {
    #[test]
    fn encoded_results_carry_exactly_one_outcome(
        result in result(),
        confidence in 0.0_f64 ..= 1.0,
    ) {
        let encoded = serde_json::to_value(result.with_confidence(confidence)).unwrap();
        let object = encoded.as_object().unwrap();
        prop_assert!(object.contains_key("data") ^ object.contains_key("error"));
        prop_assert_eq!(object["success"].as_bool().unwrap(), object.contains_key("data"));
    }

    #[test]
    fn arbitrary_objects_never_decode_into_both_outcomes(value in json_value()) {
        if let Ok(decoded) = serde_json::from_value::<CommandResult>(value) {
            prop_assert!(decoded.data().is_some() ^ decoded.error().is_some());
        }
    }

    #[test]
    fn populated_results_round_trip(data in json_value(), reasoning in "[ -~]{0,30}") {
        let mut metadata = ResultMetadata {
            execution_time_ms: Some(12),
            command_version: Some("1.2.0".to_string()),
            trace_id: Some("trace-1".to_string()),
            timestamp: Some("2026-01-01T00:00:00Z".to_string()),
            ..ResultMetadata::default()
        };
        metadata.extra.insert("region".to_string(), json!("eu"));
        let mut original = CommandResult::success(data)
            .with_confidence(0.5)
            .with_reasoning(reasoning)
            .with_sources(vec![
                Source::new("docs", SourceType::Url)
                    .with_url("https://example.com")
                    .with_relevance(0.25),
            ])
            .with_warning(Warning::new("STALE", "cached copy").with_severity(WarningSeverity::Low));
        original.plan = Some(vec![PlanStep::new("1", "fetch", PlanStepStatus::Completed)]);
        original.alternatives = Some(vec![Alternative {
            data: json!("other"),
            reason: "lower score".to_string(),
            confidence: Some(0.25),
        }]);
        original.metadata = Some(metadata);
        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: CommandResult = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(decoded, original);
    }
}
