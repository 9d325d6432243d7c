//! Anvil CLI - run shell commands as tool calls.
//!
//! ```text
//! anvil [OPTIONS] -c <COMMAND> [-c <COMMAND>...]
//! anvil [OPTIONS] -- <COMMAND WORDS>...
//! ```
//!
//! Every command becomes one `run_shell_command` call. Interactive runs go
//! through [`ToolScheduler`] and prompt on the terminal before executing;
//! `--batch` runs each call through [`NonInteractiveExecutor`] with no
//! prompts.

use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, ValueEnum};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use anvil_engine::{
    ApprovalMode, ConfirmFut, ConfirmationHandler, ConfirmationRequest, EngineConfig,
    JsonLinesToolCallLogger, NonInteractiveExecutor, SchedulerSettings, ToolCallLogger,
    ToolCallUpdate, ToolScheduler, TracingToolCallLogger,
};
use anvil_exec::{ShellExecutionService, detect_shell};
use anvil_tools::builtins::SHELL_TOOL_NAME;
use anvil_tools::{ToolEnvironment, ToolOutputChunk, ToolRegistry, register_builtins};
use anvil_types::{
    ConfirmationDetails, ConfirmationOutcome, ShellOutputEvent, ToolCallRequest, ToolCallState,
};

const LOG_ENV: &str = "ANVIL_LOG";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries command output.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
}

/// Run shell commands as tool calls
#[derive(Parser, Debug)]
#[command(name = "anvil")]
#[command(version, about, long_about = None)]
#[command(override_usage = "anvil [OPTIONS] -c <COMMAND> [-c <COMMAND>...]\n       anvil [OPTIONS] -- <COMMAND WORDS>...")]
struct Cli {
    /// Command to run (repeatable; calls run concurrently)
    #[arg(short = 'c', long = "command", value_name = "COMMAND")]
    commands: Vec<String>,

    /// Working directory (defaults to current directory)
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// When to ask before running a call
    #[arg(long, value_enum, value_name = "MODE")]
    approval_mode: Option<ApprovalModeArg>,

    /// Same as --approval-mode yolo
    #[arg(long, conflicts_with = "approval_mode")]
    yolo: bool,

    /// Run without prompts, one call at a time
    #[arg(long)]
    batch: bool,

    /// Append one JSON line per finished call
    #[arg(long, value_name = "FILE")]
    tool_log: Option<PathBuf>,

    /// Command words, joined with spaces into one more command
    #[arg(trailing_var_arg = true, value_name = "COMMAND WORDS")]
    words: Vec<String>,
}

impl Cli {
    /// `-c` commands in order, then the trailing words as one command.
    fn commands(&self) -> Vec<String> {
        let mut commands = self.commands.clone();
        if !self.words.is_empty() {
            commands.push(self.words.join(" "));
        }
        commands
    }

    fn approval_mode(&self) -> Option<ApprovalMode> {
        if self.yolo {
            return Some(ApprovalMode::Yolo);
        }
        self.approval_mode.map(ApprovalMode::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
enum ApprovalModeArg {
    /// Prompt for every call that needs approval
    Default,
    /// Apply file edits without prompting
    AutoEdit,
    /// Never prompt
    Yolo,
}

impl From<ApprovalModeArg> for ApprovalMode {
    fn from(mode: ApprovalModeArg) -> Self {
        match mode {
            ApprovalModeArg::Default => Self::Default,
            ApprovalModeArg::AutoEdit => Self::AutoEdit,
            ApprovalModeArg::Yolo => Self::Yolo,
        }
    }
}

/// Prompts on stderr and reads answers from stdin, one call at a time.
#[derive(Default)]
struct TerminalConfirmation {
    prompt: Mutex<()>,
}

impl ConfirmationHandler for TerminalConfirmation {
    fn confirm(&self, request: ConfirmationRequest) -> ConfirmFut<'_> {
        Box::pin(async move {
            let _turn = self.prompt.lock().await;
            let question = describe(&request);
            let answer = tokio::task::spawn_blocking(move || ask(&question)).await;
            match answer {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    tracing::warn!(call_id = %request.call_id, "failed to read confirmation: {err}");
                    ConfirmationOutcome::Cancel
                }
                Err(err) => {
                    tracing::warn!(call_id = %request.call_id, "confirmation prompt failed: {err}");
                    ConfirmationOutcome::Cancel
                }
            }
        })
    }
}

fn describe(request: &ConfirmationRequest) -> String {
    match &request.details {
        ConfirmationDetails::Exec {
            root_command,
            full_command,
        } => format!("Run `{full_command}`? (commands: {root_command})"),
        ConfirmationDetails::Edit { file_name, diff } => {
            format!("Apply this change to {file_name}?\n{diff}")
        }
        ConfirmationDetails::McpTool {
            server_name,
            tool_name,
        } => format!("Call {tool_name} on MCP server {server_name}?"),
        ConfirmationDetails::Info { prompt, urls } if urls.is_empty() => format!("{prompt}?"),
        ConfirmationDetails::Info { prompt, urls } => {
            format!("{prompt}? ({})", urls.join(", "))
        }
    }
}

fn ask(question: &str) -> io::Result<ConfirmationOutcome> {
    let mut stderr = io::stderr().lock();
    writeln!(stderr, "{question}")?;
    write!(stderr, "[y]es once / [a]lways / [n]o: ")?;
    stderr.flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(ConfirmationOutcome::Cancel);
    }
    Ok(parse_answer(&line))
}

fn parse_answer(line: &str) -> ConfirmationOutcome {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ConfirmationOutcome::ProceedOnce,
        "a" | "always" => ConfirmationOutcome::ProceedAlways,
        _ => ConfirmationOutcome::Cancel,
    }
}

fn shell_call(index: usize, command: &str) -> ToolCallRequest {
    ToolCallRequest::new(
        format!("call-{}", index + 1),
        SHELL_TOOL_NAME,
        json!({ "command": command }),
    )
}

fn print_chunk(chunk: &ToolOutputChunk) {
    match chunk {
        ToolOutputChunk::Shell(ShellOutputEvent::Data { chunk, .. }) | ToolOutputChunk::Text(chunk) => {
            let mut stdout = io::stdout().lock();
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        }
        ToolOutputChunk::Shell(ShellOutputEvent::BinaryDetected) => {
            eprintln!("[binary output detected]");
        }
        ToolOutputChunk::Shell(ShellOutputEvent::BinaryProgress { .. }) => {}
    }
}

fn open_tool_log(path: Option<&PathBuf>) -> Result<Arc<dyn ToolCallLogger>> {
    let Some(path) = path else {
        return Ok(Arc::new(TracingToolCallLogger));
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open tool log {}", path.display()))?;
    Ok(Arc::new(JsonLinesToolCallLogger::new(file)))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();

    let args = Cli::parse();
    let commands = args.commands();
    if commands.is_empty() {
        Cli::command()
            .error(
                clap::error::ErrorKind::MissingRequiredArgument,
                "no command given; pass -c <COMMAND> or -- <COMMAND WORDS>",
            )
            .exit();
    }

    let config = match EngineConfig::load() {
        Ok(config) => config.unwrap_or_default(),
        Err(err) => {
            eprintln!("Ignoring config at {}: {err}", err.path().display());
            EngineConfig::default()
        }
    };

    let working_dir = match args.cwd.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to resolve working directory")?,
    };
    let shell = detect_shell(config.shell.as_ref());
    tracing::debug!(shell = %shell.binary.display(), "using shell");
    let env = ToolEnvironment {
        working_dir,
        shell: Arc::new(ShellExecutionService::new(
            shell,
            config.execution.settings(),
        )),
        max_output_bytes: config.execution.max_output_bytes(),
    };

    let mut registry = ToolRegistry::default();
    register_builtins(&mut registry)?;
    let registry = Arc::new(registry);
    let logger = open_tool_log(args.tool_log.as_ref())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; cancelling tool calls");
            on_interrupt.cancel();
        }
    });

    let requests: Vec<ToolCallRequest> = commands
        .iter()
        .enumerate()
        .map(|(index, command)| shell_call(index, command))
        .collect();

    let all_succeeded = if args.batch {
        run_batch(registry, env, logger, requests, cancel).await
    } else {
        let mut settings = SchedulerSettings::from_config(&config);
        if let Some(mode) = args.approval_mode() {
            settings.approval_mode = mode;
        }
        let scheduler = ToolScheduler::new(
            registry,
            env,
            Arc::new(TerminalConfirmation::default()),
            settings,
        )
        .with_logger(logger);
        run_scheduled(&scheduler, requests, cancel).await?
    };

    Ok(if all_succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_scheduled(
    scheduler: &ToolScheduler,
    requests: Vec<ToolCallRequest>,
    cancel: CancellationToken,
) -> Result<bool> {
    let mut batch = scheduler.schedule(requests, cancel);
    while let Some(update) = batch.next_update().await {
        match update {
            ToolCallUpdate::Output { chunk, .. } => print_chunk(&chunk),
            ToolCallUpdate::StateChanged { call_id, state } => {
                tracing::debug!(%call_id, %state, "tool call state");
            }
            ToolCallUpdate::AwaitingApproval { .. } => {}
        }
    }

    let completed = batch.complete().await?;
    let mut all_succeeded = true;
    for call in &completed {
        if call.state != ToolCallState::Success {
            all_succeeded = false;
            eprintln!(
                "[{}] {}: {}",
                call.request.call_id,
                call.state,
                call.response.error.as_deref().unwrap_or(&call.response.content)
            );
        }
    }
    Ok(all_succeeded)
}

async fn run_batch(
    registry: Arc<ToolRegistry>,
    env: ToolEnvironment,
    logger: Arc<dyn ToolCallLogger>,
    requests: Vec<ToolCallRequest>,
    cancel: CancellationToken,
) -> bool {
    let executor = NonInteractiveExecutor::new(registry, env).with_logger(logger);
    let mut all_succeeded = true;
    for request in requests {
        let call_id = request.call_id.clone();
        let response = executor.execute_one(request, cancel.clone()).await;
        println!("{}", response.content);
        if let Some(error_type) = response.error_type {
            all_succeeded = false;
            eprintln!("[{call_id}] {error_type}");
        }
    }
    all_succeeded
}
