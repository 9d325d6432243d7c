//! Shell subprocess execution for Anvil.
//!
//! - [`ShellExecutionService`] spawns one command per call and streams
//!   [`ShellOutputEvent`](anvil_types::ShellOutputEvent)s while it runs.
//! - [`decoder`] turns raw pipe bytes into text and classifies binary output.
//! - [`process`] owns process-group signalling and cleanup.
//! - [`shell`] picks the shell used to interpret command strings.

pub mod decoder;
#[cfg(windows)]
mod job;
pub mod process;
mod service;
pub mod shell;

pub use decoder::{BinarySniffer, OutputDecoder, resolve_encoding};
pub use service::{
    DEFAULT_TERMINATION_GRACE, ExecutionSettings, OutputSink, ShellExecutionHandle,
    ShellExecutionService,
};
pub use shell::{DetectedShell, ShellConfig, detect_shell};

/// Failures of the execution machinery itself.
///
/// A command that cannot be started or exits non-zero is not an error here;
/// that is reported through [`ShellExecutionResult`](anvil_types::ShellExecutionResult).
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("shell execution task failed: {0}")]
    Driver(#[from] tokio::task::JoinError),
}
