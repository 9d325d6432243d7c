use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which pipe of a subprocess produced a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Live event emitted while a shell command runs.
///
/// Once `BinaryDetected` has been emitted for an execution, no further `Data`
/// events are produced for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShellOutputEvent {
    /// Decoded text with terminal escape sequences stripped.
    Data { stream: OutputStream, chunk: String },
    BinaryDetected,
    /// Cumulative byte count of all output received so far.
    BinaryProgress { bytes_received: u64 },
}

/// Final outcome of one shell execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellExecutionResult {
    /// Every byte from both streams, verbatim, in arrival order.
    pub raw_output: Vec<u8>,
    pub stdout: String,
    pub stderr: String,
    /// Both streams' text in arrival order.
    pub combined_output: String,
    /// Exit code for a normal exit. `None` when killed by a signal.
    pub exit_code: Option<i32>,
    /// Signal number that terminated the process (POSIX only).
    pub signal: Option<i32>,
    /// Set only when the OS failed to create the process.
    pub spawn_error: Option<String>,
    /// Termination was initiated by the cancellation token.
    pub aborted: bool,
    pub pid: Option<u32>,
    /// The output was classified as binary.
    pub binary: bool,
    /// Name of the encoding used to decode output (e.g. `UTF-8`).
    pub encoding: String,
    pub duration: Duration,
}

impl ShellExecutionResult {
    /// Result for a process that never started.
    pub fn spawn_failed(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            raw_output: Vec::new(),
            stdout: String::new(),
            stderr: String::new(),
            combined_output: String::new(),
            exit_code: None,
            signal: None,
            spawn_error: Some(error.into()),
            aborted: false,
            pid: None,
            binary: false,
            encoding: String::new(),
            duration,
        }
    }

    /// The process ran to completion on its own and exited with 0.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.spawn_error.is_none() && !self.aborted && self.exit_code == Some(0)
    }
}
