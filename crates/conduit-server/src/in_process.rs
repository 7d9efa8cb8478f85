// crates/conduit-server/src/in_process.rs
// ============================================================================
// Module: In-Process Transport
// Description: Direct calls into the dispatcher without serialization.
// Purpose: Serve co-located callers that need the lowest latency.
// Dependencies: conduit-core
// ============================================================================

//! ## Overview
//! [`InProcessClient`] hands typed values straight to the [`Dispatcher`].
//! Handler failures, including panics, come back as failed
//! [`CommandResult`] values because the registry runs every handler on its
//! own task; they never unwind into the caller.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use conduit_core::BatchError;
use conduit_core::BatchExecutor;
use conduit_core::BatchRequest;
use conduit_core::BatchResponse;
use conduit_core::ChunkStream;
use conduit_core::CommandContext;
use conduit_core::CommandDescriptor;
use conduit_core::CommandResult;
use conduit_core::Dispatcher;
use conduit_core::PipelineError;
use conduit_core::PipelineExecutor;
use conduit_core::PipelineRequest;
use conduit_core::PipelineResult;
use conduit_core::TraceIdGenerator;
use conduit_core::TransportKind;
use serde_json::Value;

// ============================================================================
// SECTION: Client
// ============================================================================

/// In-process command client.
#[derive(Debug, Clone)]
pub struct InProcessClient {
    /// Dispatch path.
    dispatcher: Dispatcher,
    /// Batch runner sharing the dispatch path.
    batch: BatchExecutor,
    /// Pipeline runner sharing the dispatch path.
    pipelines: PipelineExecutor,
    /// Trace id source.
    trace_ids: Arc<TraceIdGenerator>,
    /// Deadline applied to every call when set.
    timeout: Option<Duration>,
}

impl InProcessClient {
    /// Creates a client over a dispatcher and batch executor.
    #[must_use]
    pub fn new(dispatcher: Dispatcher, batch: BatchExecutor) -> Self {
        Self {
            pipelines: PipelineExecutor::new(dispatcher.clone()),
            dispatcher,
            batch,
            trace_ids: Arc::new(TraceIdGenerator::new("inproc")),
            timeout: None,
        }
    }

    /// Replaces the pipeline runner, e.g. to apply a configured step limit.
    #[must_use]
    pub fn with_pipelines(mut self, pipelines: PipelineExecutor) -> Self {
        self.pipelines = pipelines;
        self
    }

    /// Applies a deadline to every call made through this client.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns a fresh in-process context.
    #[must_use]
    pub fn context(&self) -> CommandContext {
        let context = CommandContext::new(self.trace_ids.issue(), TransportKind::InProcess);
        match self.timeout {
            Some(timeout) => context.with_timeout(timeout),
            None => context,
        }
    }

    /// Calls a command.
    pub async fn call(&self, name: &str, input: Value) -> CommandResult {
        self.dispatcher.call(name, input, self.context()).await
    }

    /// Calls a command with a caller-built context.
    pub async fn call_with(
        &self,
        name: &str,
        input: Value,
        context: CommandContext,
    ) -> CommandResult {
        self.dispatcher.call(name, input, context).await
    }

    /// Opens a chunk stream.
    pub async fn stream(&self, name: &str, input: Value, context: CommandContext) -> ChunkStream {
        self.dispatcher.stream(name, input, context).await
    }

    /// Runs a batch.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] when the batch itself is malformed.
    pub async fn batch(&self, request: BatchRequest) -> Result<BatchResponse, BatchError> {
        self.batch.execute(request, self.context()).await
    }

    /// Runs a pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the pipeline itself is malformed.
    pub async fn pipeline(
        &self,
        request: PipelineRequest,
    ) -> Result<PipelineResult, PipelineError> {
        self.pipelines.execute(request, self.context()).await
    }

    /// Lists command descriptors.
    #[must_use]
    pub fn list(&self) -> Vec<CommandDescriptor> {
        self.dispatcher.descriptors()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::panic,
        reason = "Test-only assertions are permitted."
    )]

    use std::time::Duration;

    use conduit_core::BatchExecutor;
    use conduit_core::BatchItem;
    use conduit_core::BatchRequest;
    use conduit_core::CommandDefinition;
    use conduit_core::CommandOutput;
    use conduit_core::CommandRegistry;
    use conduit_core::CommandResult;
    use conduit_core::Dispatcher;
    use conduit_core::InputSchema;
    use conduit_core::PipelineRequest;
    use conduit_core::PipelineStep;
    use conduit_core::RetryPolicy;
    use conduit_core::StreamChunk;
    use conduit_core::handler_fn;
    use serde_json::json;

    use super::InProcessClient;
    use crate::demo::demo_commands;

    fn client() -> InProcessClient {
        let mut registry = CommandRegistry::new();
        for definition in demo_commands(RetryPolicy::default()).unwrap() {
            registry.register(definition).unwrap();
        }
        registry
            .register(CommandDefinition::new(
                "demo.panic",
                "Panics",
                InputSchema::any_object().unwrap(),
                handler_fn(|input, _ctx| async move {
                    assert!(input.get("never").is_some(), "boom");
                    Ok(CommandOutput::from(CommandResult::success(input)))
                }),
            ))
            .unwrap();
        let dispatcher = Dispatcher::new(registry.into_shared().unwrap());
        InProcessClient::new(dispatcher.clone(), BatchExecutor::new(dispatcher))
    }

    #[tokio::test]
    async fn handler_panic_is_an_error_value() {
        let result = client().call("demo.panic", json!({})).await;
        let error = result.error().unwrap();
        assert_eq!(error.code, "INTERNAL_ERROR");
        assert_eq!(error.retryable, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn client_timeout_applies_to_calls() {
        let client = client().with_timeout(Duration::from_millis(50));
        let result = client.call("demo.sleep", json!({ "ms": 5_000 })).await;
        assert_eq!(result.error().unwrap().code, "TIMEOUT");
    }

    #[tokio::test]
    async fn batch_runs_through_the_same_dispatcher() {
        let request = BatchRequest {
            commands: vec![
                BatchItem::new("math.add", json!({ "a": 1, "b": 1 })),
                BatchItem::new("echo", json!({ "msg": "x" })),
            ],
            options: None,
        };
        let response = client().batch(request).await.unwrap();
        assert_eq!(response.summary.succeeded, 2);
        assert_eq!(response.results[1].result.data(), Some(&json!({ "msg": "x" })));
    }

    #[tokio::test]
    async fn pipeline_feeds_one_sum_into_the_next() {
        let request = PipelineRequest {
            id: None,
            input: Some(json!({ "offset": 10 })),
            steps: vec![
                PipelineStep::new("math.add", json!({ "a": 1, "b": 2 })).with_alias("base"),
                PipelineStep::new(
                    "math.add",
                    json!({ "a": "$steps.base.sum", "b": "$input.offset" }),
                ),
            ],
            options: None,
        };
        let result = client().pipeline(request).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.data, json!({ "sum": 13.0 }));
        assert!((result.metadata.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn flaky_upstream_succeeds_after_retries() {
        let result = client().call("demo.flaky", json!({ "failures": 2 })).await;
        assert_eq!(result.data(), Some(&json!({ "attempts": 3 })));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_count_during_delay_is_resumable() {
        let client = client();
        let context = client.context();
        let token = context.cancellation.clone();
        let mut stream =
            client.stream("demo.count", json!({ "to": 10, "delayMs": 200 }), context).await;
        loop {
            match stream.next().await.unwrap() {
                StreamChunk::Data(data) => {
                    assert_eq!(data.payload, json!(0));
                    break;
                }
                StreamChunk::Progress(_) => {}
                other => panic!("unexpected chunk {}", other.kind()),
            }
        }
        token.cancel();
        let terminal = loop {
            let chunk = stream.next().await.unwrap();
            if chunk.is_terminal() {
                break chunk;
            }
            assert!(!matches!(chunk, StreamChunk::Data(_)), "no data after cancel");
        };
        let StreamChunk::Error(error) = terminal else {
            panic!("expected error chunk");
        };
        assert_eq!(error.error.code, "COMMAND_CANCELLED");
        assert!(error.recoverable);
        assert_eq!(error.resume_from, Some(json!(1)));
    }
}
