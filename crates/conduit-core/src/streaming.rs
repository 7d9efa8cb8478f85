// crates/conduit-core/src/streaming.rs
// ============================================================================
// Module: Streaming Protocol
// Description: Typed chunk sequences produced by streaming handlers.
// Purpose: Deliver progress and partial data with a guaranteed terminal chunk.
// Dependencies: serde, serde_json, tokio, crate::{context, error, result}
// ============================================================================

//! ## Overview
//! A streaming handler returns a [`ChunkStream`] instead of a single result.
//! The producer runs on its own task and pushes `progress`/`data` chunks
//! through a bounded channel via [`ChunkEmitter`]; a stalled consumer blocks
//! the producer instead of growing a buffer. The producer's return value is
//! turned into the terminal chunk by the consumer side, so every sequence
//! ends with exactly one `complete` or `error` chunk and nothing follows it,
//! including when the producer panics or the deadline passes.
//!
//! Cancellation is cooperative. [`ChunkEmitter::checkpoint`] records the
//! producer's cursor and reports a cancelled call as a resumable failure
//! carrying it. A send that observes cancellation resumes from the last
//! recorded cursor, and is fatal only when no cursor was ever recorded.
//! Dropping an unfinished [`ChunkStream`] cancels the call.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::sync::Mutex;
use std::sync::PoisonError;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::context::CancellationToken;
use crate::context::CommandContext;
use crate::context::duration_millis;
use crate::error::CommandError;
use crate::result::CommandResult;
use crate::result::Outcome;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default number of chunks buffered between producer and consumer.
pub const DEFAULT_CHUNK_CAPACITY: usize = 16;

// ============================================================================
// SECTION: Chunks
// ============================================================================

/// Progress update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressChunk {
    /// Completed fraction between 0 and 1.
    pub fraction: f64,
    /// Human-readable status line.
    pub message: String,
    /// Items handled so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_processed: Option<u64>,
    /// Total items expected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_total: Option<u64>,
}

/// Partial payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChunk {
    /// Payload fragment.
    pub payload: Value,
    /// True on the final data fragment.
    pub is_last: bool,
}

/// Successful terminal chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteChunk {
    /// Final result of the call.
    pub result: CommandResult,
    /// Non-terminal chunks delivered before this one.
    pub total_chunks: u64,
    /// Stream lifetime in milliseconds.
    pub total_duration_ms: u64,
}

/// Failed terminal chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorChunk {
    /// Failure details.
    pub error: CommandError,
    /// Non-terminal chunks delivered before the failure.
    pub chunks_before_error: u64,
    /// True when the work can resume from `resume_from`.
    pub recoverable: bool,
    /// Producer-defined resume cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_from: Option<Value>,
}

/// One unit of a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamChunk {
    /// Progress indicator update.
    Progress(ProgressChunk),
    /// Partial data.
    Data(DataChunk),
    /// Successful end of stream.
    Complete(CompleteChunk),
    /// Failed end of stream.
    Error(ErrorChunk),
}

impl StreamChunk {
    /// Returns true for `complete` and `error` chunks.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Error(_))
    }

    /// Returns the wire tag of the chunk.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Progress(_) => "progress",
            Self::Data(_) => "data",
            Self::Complete(_) => "complete",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// SECTION: Producer
// ============================================================================

/// Failure returned by a stream producer.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFailure {
    /// Failure details.
    pub error: CommandError,
    /// True when the work can resume.
    pub recoverable: bool,
    /// Resume cursor for recoverable failures.
    pub resume_from: Option<Value>,
}

impl StreamFailure {
    /// Non-resumable failure.
    #[must_use]
    pub const fn fatal(error: CommandError) -> Self {
        Self {
            error,
            recoverable: false,
            resume_from: None,
        }
    }

    /// Resumable failure with a cursor.
    #[must_use]
    pub const fn resumable(error: CommandError, resume_from: Option<Value>) -> Self {
        Self {
            error,
            recoverable: true,
            resume_from,
        }
    }
}

impl From<CommandError> for StreamFailure {
    fn from(error: CommandError) -> Self {
        Self::fatal(error)
    }
}

/// Handle a producer uses to push non-terminal chunks.
pub struct ChunkEmitter {
    /// Bounded channel to the consumer.
    sender: mpsc::Sender<StreamChunk>,
    /// Cancellation signal of the call.
    cancellation: CancellationToken,
    /// Cursor from the most recent checkpoint.
    cursor: Mutex<Option<Value>>,
}

impl ChunkEmitter {
    /// Returns true once the caller cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancellation boundary between units of work.
    ///
    /// A `Some` cursor is remembered so later sends can resume from it.
    ///
    /// # Errors
    ///
    /// Returns a resumable `COMMAND_CANCELLED` failure carrying
    /// `resume_from` when the caller cancelled.
    pub fn checkpoint(&self, resume_from: Option<Value>) -> Result<(), StreamFailure> {
        if resume_from.is_some() {
            *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = resume_from.clone();
        }
        if self.is_cancelled() {
            return Err(StreamFailure::resumable(
                CommandError::cancelled("stream cancelled by caller"),
                resume_from,
            ));
        }
        Ok(())
    }

    /// Sends a progress update.
    ///
    /// # Errors
    ///
    /// Fails when the call was cancelled or the consumer went away.
    pub async fn progress(
        &self,
        fraction: f64,
        message: impl Into<String> + Send,
    ) -> Result<(), StreamFailure> {
        self.send(StreamChunk::Progress(ProgressChunk {
            fraction: clamp_fraction(fraction),
            message: message.into(),
            items_processed: None,
            items_total: None,
        }))
        .await
    }

    /// Sends a progress update derived from item counts.
    ///
    /// # Errors
    ///
    /// Fails when the call was cancelled or the consumer went away.
    pub async fn progress_items(
        &self,
        processed: u64,
        total: u64,
        message: impl Into<String> + Send,
    ) -> Result<(), StreamFailure> {
        let fraction = if total == 0 { 1.0 } else { ratio(processed, total) };
        self.send(StreamChunk::Progress(ProgressChunk {
            fraction: clamp_fraction(fraction),
            message: message.into(),
            items_processed: Some(processed),
            items_total: Some(total),
        }))
        .await
    }

    /// Sends a partial payload.
    ///
    /// # Errors
    ///
    /// Fails when the call was cancelled or the consumer went away.
    pub async fn data(&self, payload: Value, is_last: bool) -> Result<(), StreamFailure> {
        self.send(StreamChunk::Data(DataChunk {
            payload,
            is_last,
        }))
        .await
    }

    /// Pushes a chunk, waiting for channel capacity.
    async fn send(&self, chunk: StreamChunk) -> Result<(), StreamFailure> {
        if self.is_cancelled() {
            let error = CommandError::cancelled("stream cancelled by caller");
            let cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner).clone();
            return Err(match cursor {
                Some(cursor) => StreamFailure::resumable(error, Some(cursor)),
                None => StreamFailure::fatal(error),
            });
        }
        self.sender.send(chunk).await.map_err(|_| {
            StreamFailure::fatal(CommandError::cancelled("stream consumer disconnected"))
        })
    }
}

/// Clamps a progress fraction into 0..=1, mapping NaN to 0.
fn clamp_fraction(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Computes `processed / total` as a float.
#[allow(clippy::cast_precision_loss, reason = "Progress fractions tolerate rounding.")]
fn ratio(processed: u64, total: u64) -> f64 {
    processed as f64 / total as f64
}

// ============================================================================
// SECTION: Consumer
// ============================================================================

/// Outcome a producer settles with.
type ProducerOutcome = Result<CommandResult, StreamFailure>;

/// Where chunks come from.
enum Feed {
    /// Live producer task.
    Producer {
        /// Non-terminal chunks.
        receiver: mpsc::Receiver<StreamChunk>,
        /// Producer task; taken once the channel drains.
        task: Option<JoinHandle<ProducerOutcome>>,
    },
    /// Outcome known up front; no non-terminal chunks.
    Settled(Option<ProducerOutcome>),
}

/// Lazy, finite, non-restartable chunk sequence.
///
/// # Invariants
/// - Exactly one terminal chunk is yielded and it is the last one.
/// - `next` returns `None` forever after the terminal chunk.
pub struct ChunkStream {
    /// Chunk source.
    feed: Feed,
    /// Cancellation signal of the call.
    cancellation: CancellationToken,
    /// Deadline covering the whole stream lifetime.
    deadline: Option<Instant>,
    /// Stream start.
    started: Instant,
    /// Non-terminal chunks yielded so far.
    delivered: u64,
    /// Set once the terminal chunk was yielded.
    finished: bool,
}

impl ChunkStream {
    /// Spawns a producer with the default channel capacity.
    #[must_use]
    pub fn spawn<F, Fut>(context: &CommandContext, producer: F) -> Self
    where
        F: FnOnce(ChunkEmitter) -> Fut,
        Fut: Future<Output = ProducerOutcome> + Send + 'static,
    {
        Self::spawn_with_capacity(context, DEFAULT_CHUNK_CAPACITY, producer)
    }

    /// Spawns a producer with an explicit channel capacity.
    #[must_use]
    pub fn spawn_with_capacity<F, Fut>(
        context: &CommandContext,
        capacity: usize,
        producer: F,
    ) -> Self
    where
        F: FnOnce(ChunkEmitter) -> Fut,
        Fut: Future<Output = ProducerOutcome> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let emitter = ChunkEmitter {
            sender,
            cancellation: context.cancellation.clone(),
            cursor: Mutex::new(None),
        };
        let task = tokio::spawn(producer(emitter));
        Self {
            feed: Feed::Producer {
                receiver,
                task: Some(task),
            },
            cancellation: context.cancellation.clone(),
            deadline: context.deadline,
            started: Instant::now(),
            delivered: 0,
            finished: false,
        }
    }

    /// Wraps a single result as a one-chunk stream.
    #[must_use]
    pub fn from_result(result: CommandResult) -> Self {
        Self::settled(Ok(result))
    }

    /// Stream consisting of a single non-recoverable error chunk.
    #[must_use]
    pub fn failed(error: CommandError) -> Self {
        Self::settled(Err(StreamFailure::fatal(error)))
    }

    /// Builds a stream whose outcome is already known.
    fn settled(outcome: ProducerOutcome) -> Self {
        Self {
            feed: Feed::Settled(Some(outcome)),
            cancellation: CancellationToken::new(),
            deadline: None,
            started: Instant::now(),
            delivered: 0,
            finished: false,
        }
    }

    /// Yields the next chunk, or `None` after the terminal chunk.
    pub async fn next(&mut self) -> Option<StreamChunk> {
        if self.finished {
            return None;
        }
        let chunk = match self.deadline {
            Some(deadline) => {
                if let Ok(chunk) = tokio::time::timeout_at(deadline, self.pull()).await {
                    chunk
                } else {
                    self.cancellation.cancel();
                    let elapsed = duration_millis(self.started.elapsed());
                    StreamChunk::Error(ErrorChunk {
                        error: CommandError::timeout("stream", elapsed),
                        chunks_before_error: self.delivered,
                        recoverable: false,
                        resume_from: None,
                    })
                }
            }
            None => self.pull().await,
        };
        if chunk.is_terminal() {
            self.finished = true;
        } else {
            self.delivered += 1;
        }
        Some(chunk)
    }

    /// Drains the stream, returning the terminal outcome as a result.
    pub async fn collect_result(mut self) -> CommandResult {
        while let Some(chunk) = self.next().await {
            match chunk {
                StreamChunk::Complete(complete) => return complete.result,
                StreamChunk::Error(failed) => return CommandResult::failure(failed.error),
                StreamChunk::Progress(_) | StreamChunk::Data(_) => {}
            }
        }
        CommandResult::failure(CommandError::internal("stream ended without a terminal chunk"))
    }

    /// Drains the stream into a chunk list.
    pub async fn collect_chunks(mut self) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next().await {
            chunks.push(chunk);
        }
        chunks
    }

    /// Pulls a chunk from the feed, settling the producer once drained.
    async fn pull(&mut self) -> StreamChunk {
        let outcome = match &mut self.feed {
            Feed::Producer {
                receiver,
                task,
            } => {
                if let Some(chunk) = receiver.recv().await {
                    return chunk;
                }
                match task.take() {
                    Some(handle) => handle.await.unwrap_or_else(|err| {
                        let reason = if err.is_panic() { "panicked" } else { "was aborted" };
                        Err(StreamFailure::fatal(CommandError::internal(format!(
                            "stream producer {reason}"
                        ))))
                    }),
                    None => Err(StreamFailure::fatal(CommandError::internal(
                        "stream producer already settled",
                    ))),
                }
            }
            Feed::Settled(outcome) => outcome.take().unwrap_or_else(|| {
                Err(StreamFailure::fatal(CommandError::internal("stream already settled")))
            }),
        };
        self.terminal(outcome)
    }

    /// Converts a producer outcome into the terminal chunk.
    fn terminal(&self, outcome: ProducerOutcome) -> StreamChunk {
        match outcome {
            Ok(result) => {
                if result.is_success() {
                    return StreamChunk::Complete(CompleteChunk {
                        result,
                        total_chunks: self.delivered,
                        total_duration_ms: duration_millis(self.started.elapsed()),
                    });
                }
                let error = match result.into_outcome() {
                    Outcome::Failure(error) => error,
                    Outcome::Success(_) => CommandError::internal("inconsistent result outcome"),
                };
                StreamChunk::Error(ErrorChunk {
                    error,
                    chunks_before_error: self.delivered,
                    recoverable: false,
                    resume_from: None,
                })
            }
            Err(failure) => StreamChunk::Error(ErrorChunk {
                error: failure.error,
                chunks_before_error: self.delivered,
                recoverable: failure.recoverable,
                resume_from: failure.resume_from,
            }),
        }
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        if !self.finished {
            self.cancellation.cancel();
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
