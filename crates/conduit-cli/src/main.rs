// crates/conduit-cli/src/main.rs
// ============================================================================
// Module: Conduit CLI Entry Point
// Description: Command dispatcher for serving and calling Conduit commands.
// Purpose: Human-facing access to every transport-exposed operation.
// Dependencies: clap, conduit-cli, conduit-server, conduit-config, tokio
// ============================================================================

//! ## Overview
//! `conduit serve` runs a server; every other subcommand is an HTTP client
//! of one. Results go to stdout, diagnostics and progress to stderr. Exit
//! codes: 0 on success, 1 on any failure, 130 when a stream is interrupted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use conduit_cli::ClientError;
use conduit_cli::ConduitClient;
use conduit_cli::Session;
use conduit_cli::args::ArgsError;
use conduit_cli::args::parse_args;
use conduit_cli::args::parse_batch_item;
use conduit_cli::session::SessionError;
use conduit_cli::session::resolve_url;
use conduit_cli::session::session_dir;
use conduit_cli::validate::lint;
use conduit_config::ConduitConfig;
use conduit_config::ServerTransport;
use conduit_core::BatchOptions;
use conduit_core::BatchRequest;
use conduit_core::CommandDescriptor;
use conduit_core::CommandError;
use conduit_core::PipelineOptions;
use conduit_core::PipelineRequest;
use conduit_core::PipelineStep;
use conduit_core::StepStatus;
use conduit_core::StreamChunk;
use conduit_server::Server;
use conduit_server::ServerError;
use conduit_server::init_logging;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Exit code for a stream interrupted by the user.
const EXIT_INTERRUPTED: u8 = 130;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "conduit", version, disable_help_subcommand = true)]
struct Cli {
    /// Server URL (else the saved session, else http://127.0.0.1:7410).
    #[arg(long, env = "CONDUIT_URL", global = true)]
    url: Option<String>,
    /// Selected subcommand.
    #[command(subcommand)]
    command: Commands,
}

/// Supported subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a Conduit server with the demo command set.
    Serve(ServeCommand),
    /// Check a server and remember it for later commands.
    Connect(ConnectCommand),
    /// List the server's commands.
    Tools(ToolsCommand),
    /// Call one command.
    Call(CallCommand),
    /// Run several commands as a batch.
    Batch(BatchCommand),
    /// Run commands in sequence, feeding results forward.
    Pipeline(PipelineCommand),
    /// Stream a command's chunks.
    Stream(StreamCommand),
    /// Lint the server's command definitions.
    Validate(ValidateCommand),
}

/// Arguments for `serve`.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Config file (else `CONDUIT_CONFIG`, else ./conduit.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Transport override.
    #[arg(long, value_enum)]
    transport: Option<TransportArg>,
}

/// Transport choices for `serve`.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum TransportArg {
    /// Newline-delimited JSON-RPC over stdin/stdout.
    Stdio,
    /// HTTP with SSE.
    Http,
}

impl From<TransportArg> for ServerTransport {
    fn from(value: TransportArg) -> Self {
        match value {
            TransportArg::Stdio => Self::Stdio,
            TransportArg::Http => Self::Http,
        }
    }
}

/// Arguments for `connect`.
#[derive(Args, Debug)]
struct ConnectCommand {
    /// Server base URL.
    url: String,
}

/// Output format for `tools`.
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
enum OutputFormat {
    /// Human-readable listing grouped by category.
    #[default]
    Text,
    /// Raw descriptors.
    Json,
}

/// Arguments for `tools`.
#[derive(Args, Debug)]
struct ToolsCommand {
    /// Only list commands in this category.
    #[arg(long)]
    category: Option<String>,
    /// Output format.
    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

/// Arguments for `call`.
#[derive(Args, Debug)]
struct CallCommand {
    /// Command name.
    name: String,
    /// Arguments as one JSON object or key=value pairs.
    args: Vec<String>,
    /// Print the whole result, metadata included.
    #[arg(long)]
    verbose: bool,
}

/// Arguments for `batch`.
#[derive(Args, Debug)]
struct BatchCommand {
    /// Items written `command:args`.
    #[arg(required = true, value_name = "CMD:ARGS")]
    items: Vec<String>,
    /// Keep running after a failure.
    #[arg(long)]
    continue_on_error: bool,
    /// Items running at once.
    #[arg(long, value_name = "N")]
    max_concurrent: Option<usize>,
}

/// Arguments for `pipeline`.
#[derive(Args, Debug)]
struct PipelineCommand {
    /// Steps written `command:args`; args may reference `$prev`, `$steps[n]`.
    #[arg(value_name = "CMD:ARGS", required_unless_present = "file")]
    steps: Vec<String>,
    /// Read the whole pipeline request from a JSON file instead.
    #[arg(long, value_name = "PATH", conflicts_with = "steps")]
    file: Option<PathBuf>,
    /// Keep running after a failed step.
    #[arg(long)]
    continue_on_failure: bool,
}

/// Arguments for `stream`.
#[derive(Args, Debug)]
struct StreamCommand {
    /// Command name.
    name: String,
    /// Arguments as one JSON object or key=value pairs.
    args: Vec<String>,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
struct ValidateCommand {
    /// Treat warnings as failures.
    #[arg(long)]
    strict: bool,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failures.
#[derive(Debug, Error)]
enum CliError {
    /// Server communication failed.
    #[error(transparent)]
    Client(#[from] ClientError),
    /// Command arguments were malformed.
    #[error(transparent)]
    Args(#[from] ArgsError),
    /// The session could not be saved.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Configuration failed to load.
    #[error("config error: {0}")]
    Config(String),
    /// The server failed to start or run.
    #[error(transparent)]
    Server(#[from] ServerError),
    /// Writing output failed.
    #[error("output error: {0}")]
    Output(String),
    /// A request file could not be read or decoded.
    #[error("input error: {0}")]
    Input(String),
}

/// CLI result alias.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            let _ = write_stderr_line(&format!("error: {err}"));
            ExitCode::FAILURE
        }
    }
}

/// Dispatches the parsed command.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let url = cli.url;
    match cli.command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::Connect(command) => command_connect(command).await,
        Commands::Tools(command) => command_tools(&client_for(url.as_deref())?, command).await,
        Commands::Call(command) => command_call(&client_for(url.as_deref())?, command).await,
        Commands::Batch(command) => command_batch(&client_for(url.as_deref())?, command).await,
        Commands::Pipeline(command) => {
            command_pipeline(&client_for(url.as_deref())?, command).await
        }
        Commands::Stream(command) => command_stream(&client_for(url.as_deref())?, command).await,
        Commands::Validate(command) => {
            command_validate(&client_for(url.as_deref())?, command).await
        }
    }
}

/// Builds a client for the resolved server URL.
fn client_for(flag: Option<&str>) -> CliResult<ConduitClient> {
    let url = resolve_url(flag, session_dir().ok().as_deref());
    Ok(ConduitClient::new(&url)?)
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Runs a server until its transport stops.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let mut config = ConduitConfig::load(command.config.as_deref())
        .map_err(|err| CliError::Config(err.to_string()))?;
    if let Some(transport) = command.transport {
        config.server.transport = transport.into();
        config.validate().map_err(|err| CliError::Config(err.to_string()))?;
    }
    init_logging(&config.logging)?;
    Server::demo(config)?.serve().await?;
    Ok(ExitCode::SUCCESS)
}

/// Checks a server and saves it as the session target.
async fn command_connect(command: ConnectCommand) -> CliResult<ExitCode> {
    let client = ConduitClient::new(&command.url)?;
    let health = client.health().await?;
    let tools = client.list_tools().await?;
    let path = Session {
        url: client.base_url().as_str().trim_end_matches('/').to_string(),
    }
    .save_to(&session_dir()?)?;
    write_stdout_line(&format!(
        "connected to {} ({}, {} commands); session saved to {}",
        client.base_url(),
        health.status,
        tools.len(),
        path.display()
    ))?;
    Ok(ExitCode::SUCCESS)
}

/// Lists commands.
async fn command_tools(client: &ConduitClient, command: ToolsCommand) -> CliResult<ExitCode> {
    let tools: Vec<CommandDescriptor> = client
        .list_tools()
        .await?
        .into_iter()
        .filter(|tool| {
            command
                .category
                .as_ref()
                .is_none_or(|category| tool.category.as_ref() == Some(category))
        })
        .collect();
    match command.format {
        OutputFormat::Json => write_json(&tools)?,
        OutputFormat::Text => {
            let mut groups: BTreeMap<&str, Vec<&CommandDescriptor>> = BTreeMap::new();
            for tool in &tools {
                let category = tool.category.as_deref().unwrap_or("uncategorized");
                groups.entry(category).or_default().push(tool);
            }
            for (category, tools) in groups {
                write_stdout_line(&format!("{category}:"))?;
                for tool in tools {
                    let marker = if tool.streaming { " [stream]" } else { "" };
                    write_stdout_line(&format!("  {}{marker}  {}", tool.name, tool.description))?;
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Calls one command.
async fn command_call(client: &ConduitClient, command: CallCommand) -> CliResult<ExitCode> {
    let arguments = parse_args(&command.args)?;
    let result = client.call(&command.name, arguments).await?;
    if command.verbose {
        write_json(&result)?;
    } else if let Some(data) = result.data() {
        write_json(data)?;
    }
    match result.error() {
        Some(error) => {
            report_error(error)?;
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::SUCCESS),
    }
}

/// Runs a batch.
async fn command_batch(client: &ConduitClient, command: BatchCommand) -> CliResult<ExitCode> {
    let commands =
        command.items.iter().map(|item| parse_batch_item(item)).collect::<Result<Vec<_>, _>>()?;
    let defaults = BatchOptions::default();
    let request = BatchRequest {
        commands,
        options: Some(BatchOptions {
            continue_on_error: command.continue_on_error,
            max_concurrent: command.max_concurrent.unwrap_or(defaults.max_concurrent),
            timeout_ms: None,
        }),
    };
    let response = client.batch(&request).await?;
    write_json(&response)?;
    let summary = response.summary;
    write_stderr_line(&format!(
        "{} total, {} succeeded, {} failed, {} skipped",
        summary.total, summary.succeeded, summary.failed, summary.skipped
    ))
    .map_err(output_error)?;
    if summary.failed == 0 && summary.skipped == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Runs a pipeline from CLI words or a request file.
async fn command_pipeline(
    client: &ConduitClient,
    command: PipelineCommand,
) -> CliResult<ExitCode> {
    let mut request = match &command.file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|err| CliError::Input(format!("{}: {err}", path.display())))?;
            serde_json::from_str::<PipelineRequest>(&text)
                .map_err(|err| CliError::Input(format!("{}: {err}", path.display())))?
        }
        None => PipelineRequest {
            id: None,
            input: None,
            steps: command
                .steps
                .iter()
                .map(|word| {
                    parse_batch_item(word).map(|item| PipelineStep::new(item.command, item.input))
                })
                .collect::<Result<Vec<_>, _>>()?,
            options: None,
        },
    };
    if command.continue_on_failure {
        let options = request.options.get_or_insert_with(PipelineOptions::default);
        options.continue_on_failure = true;
    }
    let result = client.pipeline(&request).await?;
    write_json(&result)?;
    let metadata = &result.metadata;
    write_stderr_line(&format!(
        "{}/{} steps completed, confidence {:.2}",
        metadata.completed_steps, metadata.total_steps, metadata.confidence
    ))
    .map_err(output_error)?;
    if let Some(error) = result
        .steps
        .iter()
        .find(|step| step.status == StepStatus::Failure)
        .and_then(|step| step.error.as_ref())
    {
        report_error(error)?;
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Streams a command until its terminal chunk or Ctrl-C.
async fn command_stream(client: &ConduitClient, command: StreamCommand) -> CliResult<ExitCode> {
    let arguments = parse_args(&command.args)?;
    let stream = client.stream(&command.name, arguments, print_chunk);
    let terminal = tokio::select! {
        terminal = stream => terminal?,
        _ = tokio::signal::ctrl_c() => {
            write_stderr_line("interrupted").map_err(output_error)?;
            return Ok(ExitCode::from(EXIT_INTERRUPTED));
        }
    };
    match terminal {
        StreamChunk::Error(failure) => {
            report_error(&failure.error)?;
            Ok(ExitCode::FAILURE)
        }
        _ => Ok(ExitCode::SUCCESS),
    }
}

/// Lints the served command definitions.
async fn command_validate(
    client: &ConduitClient,
    command: ValidateCommand,
) -> CliResult<ExitCode> {
    let report = lint(&client.list_tools().await?);
    for finding in &report.findings {
        write_stdout_line(&format!(
            "{}: {}: {}",
            finding.severity.as_str(),
            finding.command,
            finding.message
        ))?;
    }
    write_stdout_line(&format!(
        "{} commands checked, {} findings",
        report.checked,
        report.findings.len()
    ))?;
    if report.fails(command.strict) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes one stream chunk: data to stdout, everything else to stderr.
fn print_chunk(chunk: &StreamChunk) {
    let written = match chunk {
        StreamChunk::Data(data) => write_stdout_line(&data.payload.to_string()),
        StreamChunk::Progress(progress) => write_stderr_line(&format!(
            "[{:>3.0}%] {}",
            progress.fraction * 100.0,
            progress.message
        ))
        .map_err(output_error),
        StreamChunk::Complete(complete) => write_stderr_line(&format!(
            "done: {} chunks in {} ms",
            complete.total_chunks, complete.total_duration_ms
        ))
        .map_err(output_error),
        StreamChunk::Error(_) => Ok(()),
    };
    if written.is_err() {
        let _ = write_stderr_line("output closed");
    }
}

/// Writes a command error to stderr.
fn report_error(error: &CommandError) -> CliResult<()> {
    write_stderr_line(&format!("{}: {}", error.code, error.message)).map_err(output_error)?;
    if let Some(suggestion) = &error.suggestion {
        write_stderr_line(&format!("suggestion: {suggestion}")).map_err(output_error)?;
    }
    Ok(())
}

/// Writes a value as pretty JSON to stdout.
fn write_json<T: Serialize + ?Sized>(value: &T) -> CliResult<()> {
    let text =
        serde_json::to_string_pretty(value).map_err(|err| CliError::Output(err.to_string()))?;
    write_stdout_line(&text)
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}").map_err(output_error)
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Wraps an output failure.
fn output_error(err: std::io::Error) -> CliError {
    CliError::Output(err.to_string())
}
