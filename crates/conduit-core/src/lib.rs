// crates/conduit-core/src/lib.rs
// ============================================================================
// Module: Conduit Core Library
// Description: Public API surface for the Conduit command-execution core.
// Purpose: Expose the result contract, registry, dispatch, batch, pipeline,
//          streaming, and retry building blocks shared by every transport.
// Dependencies: crate::{result, registry, dispatcher, batch, pipeline, retry}
// ============================================================================

//! ## Overview
//! Conduit core runs named, schema-validated commands and returns a uniform
//! [`CommandResult`]. Commands live in a [`CommandRegistry`] frozen at
//! startup; a [`Dispatcher`] wraps it in a middleware chain and is the only
//! entry point transports use. The [`BatchExecutor`], the
//! [`PipelineExecutor`], and streaming [`ChunkStream`] build on the
//! dispatcher, and [`retry`](mod@retry) gives handlers
//! bounded backoff against unreliable dependencies.
//!
//! The crate holds no global state and performs no I/O of its own.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod batch;
pub mod bootstrap;
pub mod command;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod metadata;
pub mod middleware;
pub mod pipeline;
pub mod registry;
pub mod result;
pub mod retry;
pub mod schema;
pub mod streaming;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use batch::BatchError;
pub use batch::BatchExecutor;
pub use batch::BatchItem;
pub use batch::BatchItemResult;
pub use batch::BatchOptions;
pub use batch::BatchRequest;
pub use batch::BatchResponse;
pub use batch::BatchSummary;
pub use command::CommandDefinition;
pub use command::CommandDescriptor;
pub use command::CommandHandler;
pub use command::CommandOutput;
pub use command::HandlerError;
pub use command::handler_fn;
pub use context::CancellationToken;
pub use context::CommandContext;
pub use context::TraceIdGenerator;
pub use context::TransportKind;
pub use dispatcher::Dispatcher;
pub use error::CommandError;
pub use error::error_codes;
pub use metadata::Alternative;
pub use metadata::PlanStep;
pub use metadata::PlanStepStatus;
pub use metadata::ResultMetadata;
pub use metadata::Source;
pub use metadata::SourceType;
pub use metadata::Warning;
pub use metadata::WarningSeverity;
pub use middleware::CommandCall;
pub use middleware::LoggingMiddleware;
pub use middleware::Middleware;
pub use middleware::Next;
pub use middleware::NextStream;
pub use middleware::RateLimitMiddleware;
pub use middleware::RateLimiter;
pub use middleware::TimingMiddleware;
pub use middleware::TraceMiddleware;
pub use pipeline::PipelineCondition;
pub use pipeline::PipelineError;
pub use pipeline::PipelineExecutor;
pub use pipeline::PipelineMetadata;
pub use pipeline::PipelineOptions;
pub use pipeline::PipelineRequest;
pub use pipeline::PipelineResult;
pub use pipeline::PipelineStep;
pub use pipeline::StepResult;
pub use pipeline::StepStatus;
pub use registry::CommandRegistry;
pub use registry::RegistryError;
pub use registry::RegistryOptions;
pub use result::CommandResult;
pub use result::Outcome;
pub use result::ResultOptions;
pub use retry::Classify;
pub use retry::ErrorCategory;
pub use retry::RetryError;
pub use retry::RetryPolicy;
pub use retry::RetryState;
pub use retry::Sleeper;
pub use retry::TokioSleeper;
pub use retry::retry;
pub use schema::FieldError;
pub use schema::InputSchema;
pub use schema::SchemaError;
pub use streaming::ChunkEmitter;
pub use streaming::ChunkStream;
pub use streaming::StreamChunk;
pub use streaming::StreamFailure;
