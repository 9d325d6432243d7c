//! Shell command execution with live output and cooperative cancellation.
//!
//! One call to [`ShellExecutionService::execute`] spawns one subprocess and a
//! driver task. Two pump tasks read stdout and stderr into a single channel,
//! so the driver sees chunks in arrival order. The driver decodes them,
//! forwards [`ShellOutputEvent`]s, and races the child's exit against the
//! cancellation token:
//!
//! ```text
//! running --cancel--> SIGTERM to group --grace elapsed--> SIGKILL to group
//!    |                      |                                  |
//!    +------ exit ----------+------------- exit ---------------+--> drain --> result
//! ```

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anvil_types::{OutputStream, ShellExecutionResult, ShellOutputEvent, TerminalTextFilter};
use encoding_rs::Encoding;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ExecError;
use crate::decoder::{
    BinarySniffer, DEFAULT_SNIFF_BYTES, DEFAULT_SNIFF_CHUNKS, OutputDecoder, resolve_encoding,
};
use crate::process::{self, ProcessTreeGuard, TerminationSignal};
use crate::shell::DetectedShell;

/// Time between the terminate and kill signals after cancellation.
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_millis(200);

const READ_BUFFER_BYTES: usize = 8 * 1024;
const CHUNK_CHANNEL_CAPACITY: usize = 64;
/// How long to keep reading after exit while a background process still
/// holds the output pipes open.
const POST_EXIT_DRAIN: Duration = Duration::from_millis(250);

/// Receiving end of live output events.
pub type OutputSink = mpsc::Sender<ShellOutputEvent>;

/// Tunables for every execution started by one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSettings {
    pub termination_grace: Duration,
    pub sniff_bytes: usize,
    pub sniff_chunks: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            termination_grace: DEFAULT_TERMINATION_GRACE,
            sniff_bytes: DEFAULT_SNIFF_BYTES,
            sniff_chunks: DEFAULT_SNIFF_CHUNKS,
        }
    }
}

/// Spawns shell commands through a fixed shell.
#[derive(Debug, Clone)]
pub struct ShellExecutionService {
    shell: DetectedShell,
    settings: ExecutionSettings,
}

impl ShellExecutionService {
    #[must_use]
    pub fn new(shell: DetectedShell, settings: ExecutionSettings) -> Self {
        Self { shell, settings }
    }

    #[must_use]
    pub fn shell(&self) -> &DetectedShell {
        &self.shell
    }

    #[must_use]
    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Start `command` in `cwd`.
    ///
    /// Never fails: a process that cannot be created yields a handle whose
    /// result carries `spawn_error`. Events go to `events` while the receiver
    /// is alive; the engine waits for channel capacity rather than dropping
    /// events. Must be called within a Tokio runtime.
    pub fn execute(
        &self,
        command: &str,
        cwd: &Path,
        events: Option<OutputSink>,
        cancel: CancellationToken,
    ) -> ShellExecutionHandle {
        let started = Instant::now();
        let mut cmd = self.build_command(command, cwd);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                tracing::warn!(
                    command,
                    cwd = %cwd.display(),
                    shell = %self.shell,
                    "failed to spawn shell command: {err}"
                );
                return ShellExecutionHandle::finished(ShellExecutionResult::spawn_failed(
                    err.to_string(),
                    started.elapsed(),
                ));
            }
        };

        let pid = child.id();
        tracing::debug!(?pid, command, cwd = %cwd.display(), shell = %self.shell, "spawned shell command");

        #[cfg(windows)]
        let job = match crate::job::attach_kill_on_close(&child) {
            Ok(job) => Some(job),
            Err(err) => {
                tracing::warn!(?pid, "kill-on-close job unavailable: {err}");
                None
            }
        };

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, OutputStream::Stdout, chunk_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, OutputStream::Stderr, chunk_tx.clone()));
        }
        drop(chunk_tx);

        let driver = Driver {
            guard: ProcessTreeGuard::new(pid),
            child,
            pid,
            chunks: chunk_rx,
            output: OutputAccumulator::new(&self.settings, events, cancel.clone()),
            cancel,
            grace: self.settings.termination_grace,
            started,
            #[cfg(windows)]
            _job: job,
        };
        ShellExecutionHandle {
            pid,
            state: HandleState::Running(tokio::spawn(driver.run())),
        }
    }

    fn build_command(&self, command: &str, cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.shell.binary);
        cmd.args(&self.shell.args)
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        process::set_new_session(&mut cmd);
        cmd
    }
}

/// A running (or already failed) execution.
#[derive(Debug)]
pub struct ShellExecutionHandle {
    pid: Option<u32>,
    state: HandleState,
}

#[derive(Debug)]
enum HandleState {
    Finished(Box<ShellExecutionResult>),
    Running(JoinHandle<ShellExecutionResult>),
}

impl ShellExecutionHandle {
    fn finished(result: ShellExecutionResult) -> Self {
        Self {
            pid: result.pid,
            state: HandleState::Finished(Box::new(result)),
        }
    }

    /// OS process id, absent when spawning failed.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the process to finish and its output to drain.
    pub async fn result(self) -> Result<ShellExecutionResult, ExecError> {
        match self.state {
            HandleState::Finished(result) => Ok(*result),
            HandleState::Running(task) => task.await.map_err(|err| {
                tracing::error!(pid = ?self.pid, "shell execution driver failed: {err}");
                ExecError::from(err)
            }),
        }
    }
}

async fn pump<R>(mut reader: R, stream: OutputStream, tx: mpsc::Sender<(OutputStream, Vec<u8>)>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_BYTES];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send((stream, buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::debug!(?stream, "output pipe read failed: {err}");
                break;
            }
        }
    }
}

struct Driver {
    // Declared first so the tree is killed before `child` is dropped.
    guard: ProcessTreeGuard,
    child: Child,
    pid: Option<u32>,
    chunks: mpsc::Receiver<(OutputStream, Vec<u8>)>,
    output: OutputAccumulator,
    cancel: CancellationToken,
    grace: Duration,
    started: Instant,
    #[cfg(windows)]
    _job: Option<crate::job::KillOnCloseJob>,
}

impl Driver {
    async fn run(mut self) -> ShellExecutionResult {
        let mut status: Option<ExitStatus> = None;
        let mut exited = false;
        let mut streams_open = true;
        let mut aborted = false;
        let mut kill_at: Option<Instant> = None;

        while !exited {
            tokio::select! {
                chunk = self.chunks.recv(), if streams_open => match chunk {
                    Some((stream, bytes)) => self.output.ingest(stream, &bytes).await,
                    None => streams_open = false,
                },
                waited = self.child.wait() => {
                    exited = true;
                    match waited {
                        Ok(exit) => status = Some(exit),
                        Err(err) => tracing::warn!(pid = ?self.pid, "failed to wait for shell process: {err}"),
                    }
                }
                () = self.cancel.cancelled(), if !aborted => {
                    aborted = true;
                    tracing::debug!(pid = ?self.pid, "cancellation requested; terminating shell process");
                    self.signal(TerminationSignal::Terminate);
                    kill_at = Some(Instant::now() + self.grace);
                }
                () = sleep_until(kill_at), if kill_at.is_some() => {
                    kill_at = None;
                    tracing::info!(pid = ?self.pid, grace_ms = self.grace.as_millis(), "shell process outlived grace period; killing");
                    self.signal(TerminationSignal::Kill);
                }
            }
        }

        // The shell may exit on SIGTERM while others in its group ignore it.
        if let Some(deadline) = kill_at {
            self.await_kill_deadline(deadline, &mut streams_open).await;
            tracing::debug!(pid = ?self.pid, "grace period over; killing what is left of the process group");
            self.signal(TerminationSignal::Kill);
        }
        self.guard.disarm();

        if streams_open {
            self.drain().await;
        }
        self.finish(status, aborted).await
    }

    /// Keep reading output until the kill deadline of a cancelled command.
    async fn await_kill_deadline(&mut self, deadline: Instant, streams_open: &mut bool) {
        loop {
            tokio::select! {
                chunk = self.chunks.recv(), if *streams_open => match chunk {
                    Some((stream, bytes)) => self.output.ingest(stream, &bytes).await,
                    None => *streams_open = false,
                },
                () = tokio::time::sleep_until(deadline) => return,
            }
        }
    }

    /// Read what is left in the pipes once the child has exited.
    async fn drain(&mut self) {
        let deadline = Instant::now() + POST_EXIT_DRAIN;
        loop {
            match tokio::time::timeout_at(deadline, self.chunks.recv()).await {
                Ok(Some((stream, bytes))) => self.output.ingest(stream, &bytes).await,
                Ok(None) => return,
                Err(_) => {
                    tracing::debug!(pid = ?self.pid, "output pipes still open after exit; detaching");
                    return;
                }
            }
        }
    }

    fn signal(&mut self, signal: TerminationSignal) {
        let Some(pid) = self.pid else {
            if let Err(err) = self.child.start_kill() {
                tracing::warn!("failed to kill shell process: {err}");
            }
            return;
        };
        match process::signal_process_tree(pid, signal) {
            Ok(outcome) => tracing::debug!(pid, ?signal, ?outcome, "signalled shell process"),
            Err(err) => {
                tracing::warn!(pid, ?signal, "failed to signal shell process tree: {err}");
                if signal == TerminationSignal::Kill
                    && let Err(err) = self.child.start_kill()
                {
                    tracing::warn!(pid, "failed to kill shell process: {err}");
                }
            }
        }
    }

    async fn finish(mut self, status: Option<ExitStatus>, aborted: bool) -> ShellExecutionResult {
        let (exit_code, signal) = status.map_or((None, None), exit_parts);
        self.output.flush().await;
        let duration = self.started.elapsed();
        tracing::debug!(
            pid = ?self.pid,
            ?exit_code,
            ?signal,
            aborted,
            elapsed_ms = duration.as_millis(),
            "shell command finished"
        );
        self.output.into_result(ExitInfo {
            exit_code,
            signal,
            aborted,
            pid: self.pid,
            duration,
        })
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
fn exit_parts(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal())
}

#[cfg(not(unix))]
fn exit_parts(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), None)
}

struct ExitInfo {
    exit_code: Option<i32>,
    signal: Option<i32>,
    aborted: bool,
    pid: Option<u32>,
    duration: Duration,
}

/// Decoded text for one pipe.
#[derive(Default)]
struct StreamText {
    decoder: Option<OutputDecoder>,
    filter: TerminalTextFilter,
    text: String,
}

impl StreamText {
    fn push(&mut self, encoding: &'static Encoding, bytes: &[u8]) -> String {
        let decoder = self
            .decoder
            .get_or_insert_with(|| OutputDecoder::new(encoding));
        let clean = self.filter.push(&decoder.decode(bytes));
        self.text.push_str(&clean);
        clean
    }

    fn flush(&mut self) -> String {
        let Some(decoder) = self.decoder.as_mut() else {
            return String::new();
        };
        let clean = self.filter.push(&decoder.finish());
        self.text.push_str(&clean);
        clean
    }
}

/// Everything accumulated for the final result, plus the live event sink.
struct OutputAccumulator {
    raw: Vec<u8>,
    combined: String,
    stdout: StreamText,
    stderr: StreamText,
    encoding: Option<&'static Encoding>,
    sniffer: BinarySniffer,
    binary: bool,
    bytes_received: u64,
    events: Option<OutputSink>,
    cancel: CancellationToken,
}

impl OutputAccumulator {
    fn new(
        settings: &ExecutionSettings,
        events: Option<OutputSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            raw: Vec::new(),
            combined: String::new(),
            stdout: StreamText::default(),
            stderr: StreamText::default(),
            encoding: None,
            sniffer: BinarySniffer::new(settings.sniff_bytes, settings.sniff_chunks),
            binary: false,
            bytes_received: 0,
            events,
            cancel,
        }
    }

    fn stream_mut(&mut self, stream: OutputStream) -> &mut StreamText {
        match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        }
    }

    async fn ingest(&mut self, stream: OutputStream, bytes: &[u8]) {
        self.raw.extend_from_slice(bytes);
        self.bytes_received += bytes.len() as u64;

        let newly_binary = !self.binary && self.sniffer.observe(bytes);
        let encoding = *self
            .encoding
            .get_or_insert_with(|| resolve_encoding(bytes));
        let text = self.stream_mut(stream).push(encoding, bytes);
        self.combined.push_str(&text);

        if newly_binary {
            self.binary = true;
            tracing::debug!(bytes = self.bytes_received, "shell output classified as binary");
            self.emit(ShellOutputEvent::BinaryDetected).await;
        }
        if self.binary {
            self.emit(ShellOutputEvent::BinaryProgress {
                bytes_received: self.bytes_received,
            })
            .await;
        } else if !text.is_empty() {
            self.emit(ShellOutputEvent::Data { stream, chunk: text }).await;
        }
    }

    /// Complete both decoders at end of output.
    async fn flush(&mut self) {
        for stream in [OutputStream::Stdout, OutputStream::Stderr] {
            let tail = self.stream_mut(stream).flush();
            if tail.is_empty() {
                continue;
            }
            self.combined.push_str(&tail);
            if !self.binary {
                self.emit(ShellOutputEvent::Data { stream, chunk: tail }).await;
            }
        }
    }

    async fn emit(&mut self, event: ShellOutputEvent) {
        let Some(sink) = &self.events else {
            return;
        };
        // A backed-up subscriber must not hold off termination once the
        // command is cancelled; such events are dropped instead.
        let sent = tokio::select! {
            biased;
            sent = sink.send(event) => sent,
            () = self.cancel.cancelled() => {
                tracing::trace!("subscriber full after cancellation; event dropped");
                return;
            }
        };
        if sent.is_err() {
            tracing::trace!("output subscriber went away; no further events");
            self.events = None;
        }
    }

    fn into_result(self, exit: ExitInfo) -> ShellExecutionResult {
        ShellExecutionResult {
            raw_output: self.raw,
            stdout: self.stdout.text,
            stderr: self.stderr.text,
            combined_output: self.combined,
            exit_code: exit.exit_code,
            signal: exit.signal,
            spawn_error: None,
            aborted: exit.aborted,
            pid: exit.pid,
            binary: self.binary,
            encoding: self
                .encoding
                .map_or_else(|| encoding_rs::UTF_8.name(), Encoding::name)
                .to_string(),
            duration: exit.duration,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn service() -> ShellExecutionService {
        ShellExecutionService::new(DetectedShell::posix_sh(), ExecutionSettings::default())
    }

    async fn run(command: &str) -> ShellExecutionResult {
        let dir = tempfile::tempdir().unwrap();
        service()
            .execute(command, dir.path(), None, CancellationToken::new())
            .result()
            .await
            .unwrap()
    }

    async fn collect(mut rx: mpsc::Receiver<ShellOutputEvent>) -> Vec<ShellOutputEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn echo_succeeds() {
        let result = run("echo hello").await;
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.signal, None);
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "");
        assert!(!result.aborted);
        assert!(result.pid.is_some());
        assert_eq!(result.encoding, "UTF-8");
        assert!(result.succeeded());
    }

    #[tokio::test]
    async fn stderr_and_exit_code_are_reported() {
        let result = run("echo oops >&2; exit 3").await;
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stdout, "");
        assert_eq!(result.stderr, "oops\n");
        assert!(!result.aborted);
    }

    #[tokio::test]
    async fn combined_output_keeps_arrival_order() {
        let result = run("echo one; sleep 0.1; echo two >&2; sleep 0.1; echo three").await;
        assert_eq!(result.combined_output, "one\ntwo\nthree\n");
        assert_eq!(result.raw_output, b"one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn missing_cwd_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let handle = service().execute("echo hi", &missing, None, CancellationToken::new());
        assert_eq!(handle.pid(), None);
        let result = handle.result().await.unwrap();
        assert!(result.spawn_error.is_some());
        assert_eq!(result.exit_code, None);
        assert_eq!(result.signal, None);
        assert!(!result.aborted);
    }

    #[tokio::test]
    async fn cancellation_terminates_and_marks_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let handle = service().execute("sleep 100", dir.path(), None, cancel.clone());
        let pid = handle.pid().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle.result())
            .await
            .unwrap()
            .unwrap();

        assert!(result.aborted);
        assert_eq!(result.exit_code, None);
        assert!(result.signal.is_some());
        assert!(!process::is_process_running(pid));
    }

    #[tokio::test]
    async fn cancellation_escalates_when_terminate_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let handle = service().execute(
            "trap '' TERM; echo ready; sleep 100",
            dir.path(),
            None,
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle.result())
            .await
            .unwrap()
            .unwrap();

        assert!(result.aborted);
        assert_eq!(result.signal, Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn cancellation_reaches_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        let handle = service().execute(
            "sleep 100 & echo $!; wait",
            dir.path(),
            Some(tx),
            cancel.clone(),
        );

        let grandchild = match rx.recv().await {
            Some(ShellOutputEvent::Data { chunk, .. }) => chunk.trim().parse::<u32>().unwrap(),
            other => panic!("expected pid output, got {other:?}"),
        };
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle.result())
            .await
            .unwrap()
            .unwrap();
        assert!(result.aborted);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!process::is_process_running(grandchild));
    }

    #[tokio::test]
    async fn group_members_ignoring_terminate_are_killed_after_the_shell_exits() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        let settings = ExecutionSettings {
            termination_grace: Duration::from_millis(200),
            ..ExecutionSettings::default()
        };
        let handle = ShellExecutionService::new(DetectedShell::posix_sh(), settings).execute(
            "(trap '' TERM; exec sleep 100) & echo $!; wait",
            dir.path(),
            Some(tx),
            cancel.clone(),
        );

        let stubborn = match rx.recv().await {
            Some(ShellOutputEvent::Data { chunk, .. }) => chunk.trim().parse::<u32>().unwrap(),
            other => panic!("expected pid output, got {other:?}"),
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle.result())
            .await
            .unwrap()
            .unwrap();
        assert!(result.aborted);
        // The shell itself went down on SIGTERM.
        assert_eq!(result.signal, Some(libc::SIGTERM));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!process::is_process_running(stubborn));
    }

    #[tokio::test]
    async fn stalled_subscriber_does_not_delay_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        // Kept alive but never read, so the channel fills after one event.
        let (tx, _rx) = mpsc::channel(1);
        let handle = service().execute(
            "while :; do echo line; done",
            dir.path(),
            Some(tx),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle.result())
            .await
            .unwrap()
            .unwrap();
        assert!(result.aborted);
        assert!(result.stdout.starts_with("line\n"));
    }

    #[tokio::test]
    async fn binary_output_switches_to_progress_events() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(64);
        let handle = service().execute(
            r"printf '\211PNG\r\n\032\n'; printf 'more bytes'",
            dir.path(),
            Some(tx),
            CancellationToken::new(),
        );
        let result = handle.result().await.unwrap();
        let events = collect(rx).await;

        assert!(result.binary);
        assert_eq!(result.raw_output.len(), 18);
        let detected = events
            .iter()
            .position(|event| *event == ShellOutputEvent::BinaryDetected)
            .unwrap();
        assert!(
            events[detected..]
                .iter()
                .all(|event| !matches!(event, ShellOutputEvent::Data { .. }))
        );
        assert_eq!(
            events.last(),
            Some(&ShellOutputEvent::BinaryProgress { bytes_received: 18 })
        );
    }

    #[tokio::test]
    async fn data_events_are_stripped_of_escape_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(64);
        let handle = service().execute(
            r"printf '\033[31mred\033[0m plain\n'",
            dir.path(),
            Some(tx),
            CancellationToken::new(),
        );
        let result = handle.result().await.unwrap();
        let text: String = collect(rx)
            .await
            .into_iter()
            .filter_map(|event| match event {
                ShellOutputEvent::Data { chunk, .. } => Some(chunk),
                _ => None,
            })
            .collect();

        assert_eq!(text, "red plain\n");
        assert_eq!(result.stdout, "red plain\n");
        assert!(result.raw_output.starts_with(b"\x1b[31m"));
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_stall_execution() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let result = service()
            .execute("seq 1 2000", dir.path(), Some(tx), CancellationToken::new())
            .result()
            .await
            .unwrap();
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.ends_with("2000\n"));
    }
}
