// crates/conduit-server/src/server.rs
// ============================================================================
// Module: Conduit Server
// Description: Assembles registry, middleware, and transports from config.
// Purpose: Single entry point for `conduit serve` and embedders.
// Dependencies: conduit-config, conduit-core, tokio
// ============================================================================

//! ## Overview
//! [`Server::from_config`] validates the configuration, freezes the command
//! registry, and builds one dispatcher shared by every transport. The
//! middleware chain runs logging outermost, then rate limiting when
//! configured, then timing, with trace stamping innermost.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use conduit_config::ConduitConfig;
use conduit_config::RetryConfig;
use conduit_config::ServerTransport;
use conduit_core::BatchExecutor;
use conduit_core::BatchOptions;
use conduit_core::PipelineExecutor;
use conduit_core::CommandDefinition;
use conduit_core::CommandRegistry;
use conduit_core::Dispatcher;
use conduit_core::LoggingMiddleware;
use conduit_core::RateLimitMiddleware;
use conduit_core::RateLimiter;
use conduit_core::RegistryOptions;
use conduit_core::RetryPolicy;
use conduit_core::TimingMiddleware;
use conduit_core::TraceMiddleware;
use tokio::net::TcpListener;

use crate::audit::AuditSink;
use crate::audit::sink_from_config;
use crate::demo::demo_commands;
use crate::error::ServerError;
use crate::http::HttpLimits;
use crate::http::HttpState;
use crate::http::serve_http;
use crate::in_process::InProcessClient;
use crate::jsonrpc::RpcService;
use crate::stdio::StdioLimits;
use crate::stdio::serve_stdio;

// ============================================================================
// SECTION: Server
// ============================================================================

/// Configured command server.
pub struct Server {
    /// Validated configuration.
    config: ConduitConfig,
    /// Shared dispatch path.
    dispatcher: Dispatcher,
    /// Batch runner over the dispatcher.
    batch: BatchExecutor,
    /// Pipeline runner over the dispatcher.
    pipelines: PipelineExecutor,
    /// Audit sink shared by transports.
    audit: Arc<dyn AuditSink>,
    /// JSON-RPC service shared by stdio and HTTP.
    service: Arc<RpcService>,
}

impl Server {
    /// Builds a server over the given commands.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for invalid configuration and
    /// [`ServerError::Init`] when a command cannot be registered or the
    /// audit sink cannot be opened.
    pub fn from_config(
        mut config: ConduitConfig,
        commands: Vec<CommandDefinition>,
    ) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        let mut registry = CommandRegistry::with_options(RegistryOptions {
            expose_internal_errors: config.server.expose_internal_errors,
        });
        for definition in commands {
            registry.register(definition).map_err(|err| ServerError::Init(err.to_string()))?;
        }
        let registry = registry.into_shared().map_err(|err| ServerError::Init(err.to_string()))?;
        tracing::info!(commands = registry.len(), "command registry frozen");

        let mut dispatcher = Dispatcher::new(registry).with_middleware(LoggingMiddleware);
        if let Some(rate_limit) = &config.server.rate_limit {
            let limiter = RateLimiter::new(
                rate_limit.max_requests,
                Duration::from_millis(rate_limit.window_ms),
                rate_limit.max_entries,
            );
            dispatcher = dispatcher.with_middleware(RateLimitMiddleware::new(limiter));
        }
        let dispatcher =
            dispatcher.with_middleware(TimingMiddleware).with_middleware(TraceMiddleware);

        let audit = sink_from_config(&config.server.audit)
            .map_err(|err| ServerError::Init(format!("audit sink: {err}")))?;
        let batch = BatchExecutor::new(dispatcher.clone())
            .with_defaults(BatchOptions {
                continue_on_error: config.batch.continue_on_error,
                max_concurrent: config.batch.max_concurrent,
                timeout_ms: None,
            })
            .with_max_commands(config.batch.max_commands);
        let pipelines =
            PipelineExecutor::new(dispatcher.clone()).with_max_steps(config.pipeline.max_steps);
        let service = Arc::new(
            RpcService::new(dispatcher.clone(), Arc::clone(&audit))
                .with_default_timeout(config.server.request_timeout_ms.map(Duration::from_millis)),
        );
        Ok(Self {
            config,
            dispatcher,
            batch,
            pipelines,
            audit,
            service,
        })
    }

    /// Builds a server exposing the demo command set.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when configuration or registration fails.
    pub fn demo(config: ConduitConfig) -> Result<Self, ServerError> {
        let commands = demo_commands(retry_policy(&config.retry))
            .map_err(|err| ServerError::Init(err.to_string()))?;
        Self::from_config(config, commands)
    }

    /// Returns the validated configuration.
    #[must_use]
    pub const fn config(&self) -> &ConduitConfig {
        &self.config
    }

    /// Returns the shared dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Returns an in-process client sharing the dispatch path.
    #[must_use]
    pub fn in_process(&self) -> InProcessClient {
        let client = InProcessClient::new(self.dispatcher.clone(), self.batch.clone())
            .with_pipelines(self.pipelines.clone());
        match self.config.server.request_timeout_ms {
            Some(ms) => client.with_timeout(Duration::from_millis(ms)),
            None => client,
        }
    }

    /// Returns the JSON-RPC service shared by line and HTTP transports.
    #[must_use]
    pub fn rpc_service(&self) -> Arc<RpcService> {
        Arc::clone(&self.service)
    }

    /// Returns fresh HTTP route state.
    #[must_use]
    pub fn http_state(&self) -> Arc<HttpState> {
        Arc::new(HttpState::new(
            Arc::clone(&self.service),
            self.batch.clone(),
            self.pipelines.clone(),
            Arc::clone(&self.audit),
            HttpLimits {
                max_body_bytes: self.config.server.max_body_bytes,
                max_inflight: self.config.server.max_inflight,
            },
        ))
    }

    /// Makes this server's commands the ones served by a running HTTP
    /// state, announcing `tools_changed` to push subscribers.
    pub fn publish_to(&self, state: &HttpState) {
        state.replace_commands(self.rpc_service(), self.batch.clone(), self.pipelines.clone());
    }

    /// Returns the line transport limits.
    #[must_use]
    pub const fn stdio_limits(&self) -> StdioLimits {
        StdioLimits {
            max_line_bytes: self.config.server.max_body_bytes,
            max_inflight: self.config.server.max_inflight,
        }
    }

    /// Serves the configured transport until it stops.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when binding or serving fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        match self.config.server.transport {
            ServerTransport::Stdio => {
                tracing::info!("stdio transport ready");
                serve_stdio(self.rpc_service(), self.stdio_limits()).await
            }
            ServerTransport::Http => {
                let addr = self
                    .config
                    .server
                    .bind_addr()
                    .map_err(|err| ServerError::Config(err.to_string()))?;
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|err| ServerError::Transport(format!("bind {addr}: {err}")))?;
                self.serve_http_on(listener).await
            }
        }
    }

    /// Serves HTTP on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when serving fails.
    pub async fn serve_http_on(self, listener: TcpListener) -> Result<(), ServerError> {
        serve_http(listener, self.http_state()).await
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Converts retry configuration into a policy.
#[must_use]
pub const fn retry_policy(config: &RetryConfig) -> RetryPolicy {
    RetryPolicy {
        max_retries: config.max_retries,
        base_delay: Duration::from_millis(config.base_delay_ms),
        max_delay: Duration::from_millis(config.max_delay_ms),
    }
}
