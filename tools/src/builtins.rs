//! Built-in tool executors.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Component, Path, PathBuf};

use anvil_types::{ConfirmationDetails, ShellExecutionResult};
use serde::Deserialize;
use serde_json::{Value, json};
use similar::TextDiff;
use tokio::sync::mpsc;

use crate::{
    ToolCtx, ToolError, ToolExecutor, ToolFut, ToolKind, ToolOutput, ToolOutputChunk,
    ToolRegistry, command_roots, parse_args, truncate_output,
};

pub const SHELL_TOOL_NAME: &str = "run_shell_command";
pub const WRITE_FILE_TOOL_NAME: &str = "write_file";

const SHELL_EVENT_CAPACITY: usize = 64;

/// Register every built-in tool.
pub fn register_builtins(registry: &mut ToolRegistry) -> Result<(), ToolError> {
    registry.register(Box::new(ShellTool))?;
    registry.register(Box::new(WriteFileTool))?;
    Ok(())
}

/// Resolve `path` against `root` without touching the filesystem and
/// require the result to stay inside `root`.
pub fn resolve_within(root: &Path, path: &Path) -> Result<PathBuf, ToolError> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let resolved = normalize(&joined);
    if resolved.starts_with(normalize(root)) {
        Ok(resolved)
    } else {
        Err(ToolError::BadArgs {
            message: format!(
                "path {} is outside the working directory {}",
                path.display(),
                root.display()
            ),
        })
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct ShellArgs {
    command: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    directory: Option<String>,
}

impl ShellArgs {
    fn cwd(&self, working_dir: &Path) -> Result<PathBuf, ToolError> {
        match self.directory.as_deref() {
            None | Some("") => Ok(working_dir.to_path_buf()),
            Some(dir) if Path::new(dir).is_absolute() => Err(ToolError::BadArgs {
                message: "directory must be relative to the working directory".to_string(),
            }),
            Some(dir) => resolve_within(working_dir, Path::new(dir)),
        }
    }
}

/// Runs a command through the session shell.
#[derive(Debug, Default)]
pub struct ShellTool;

impl ToolExecutor for ShellTool {
    fn name(&self) -> &str {
        SHELL_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Execute a shell command. Output from stdout and stderr is streamed while \
         the command runs and returned with its exit code or terminating signal."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Exact command line to execute"
                },
                "description": {
                    "type": "string",
                    "description": "Brief description of the command for the user"
                },
                "directory": {
                    "type": "string",
                    "description": "Directory to run in, relative to the working directory"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Execute
    }

    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        crate::validate_args(&self.schema(), args)?;
        let typed: ShellArgs = parse_args(args)?;
        if typed.command.trim().is_empty() {
            return Err(ToolError::BadArgs {
                message: "command cannot be empty".to_string(),
            });
        }
        if command_roots(&typed.command).is_empty() {
            return Err(ToolError::BadArgs {
                message: "could not identify a command to run".to_string(),
            });
        }
        if let Some(dir) = typed.directory.as_deref()
            && Path::new(dir).is_absolute()
        {
            return Err(ToolError::BadArgs {
                message: "directory must be relative to the working directory".to_string(),
            });
        }
        Ok(())
    }

    fn confirmation_details(
        &self,
        args: &Value,
        _ctx: &ToolCtx,
    ) -> Result<Option<ConfirmationDetails>, ToolError> {
        let typed: ShellArgs = parse_args(args)?;
        let roots = command_roots(&typed.command);
        Ok(Some(ConfirmationDetails::exec(&roots, typed.command)))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ShellArgs = parse_args(&args)?;
            let cwd = typed.cwd(&ctx.working_dir)?;
            if let Some(description) = typed.description.as_deref() {
                tracing::debug!(call_id = %ctx.call_id, description, "running shell command");
            }

            let (tx, mut rx) = mpsc::channel(SHELL_EVENT_CAPACITY);
            let handle = ctx
                .shell
                .execute(&typed.command, &cwd, Some(tx), ctx.cancel.clone());

            let mut sink = ctx.output.clone();
            let forward = async move {
                while let Some(event) = rx.recv().await {
                    if let Some(out) = &sink
                        && out.send(ToolOutputChunk::Shell(event)).await.is_err()
                    {
                        sink = None;
                    }
                }
            };
            let (result, ()) = tokio::join!(handle.result(), forward);
            let result =
                result.map_err(|err| ToolError::execution(SHELL_TOOL_NAME, err.to_string()))?;

            let content = truncate_output(
                format_shell_result(&typed, &result),
                ctx.max_output_bytes,
            );
            if result.spawn_error.is_some() {
                return Err(ToolError::execution(SHELL_TOOL_NAME, content));
            }
            let display = truncate_output(shell_display(&result), ctx.max_output_bytes);
            Ok(ToolOutput::text(content)
                .with_display(display)
                .with_exit(result.exit_code, result.signal, result.aborted))
        })
    }
}

/// Text returned to the requester for one shell execution.
fn format_shell_result(args: &ShellArgs, result: &ShellExecutionResult) -> String {
    let directory = args.directory.as_deref().unwrap_or("(root)");
    let mut out = String::new();

    if result.aborted {
        out.push_str("Command was cancelled before it could complete.");
        if result.combined_output.trim().is_empty() {
            out.push_str(" There was no output before it was cancelled.");
        } else {
            let _ = write!(
                out,
                " Below is the output before it was cancelled:\n{}",
                result.combined_output
            );
        }
        return out;
    }

    let (stdout, stderr) = if result.binary {
        let summary = format!("[binary output: {} bytes]", result.raw_output.len());
        (summary, "(empty)".to_string())
    } else {
        (or_empty(&result.stdout), or_empty(&result.stderr))
    };
    let _ = writeln!(out, "Command: {}", args.command);
    let _ = writeln!(out, "Directory: {directory}");
    let _ = writeln!(out, "Stdout: {stdout}");
    let _ = writeln!(out, "Stderr: {stderr}");
    let _ = writeln!(
        out,
        "Error: {}",
        result.spawn_error.as_deref().unwrap_or("(none)")
    );
    let _ = writeln!(out, "Exit Code: {}", or_none(result.exit_code));
    let _ = write!(out, "Signal: {}", or_none(result.signal));
    out
}

fn or_empty(text: &str) -> String {
    if text.trim().is_empty() {
        "(empty)".to_string()
    } else {
        text.trim_end().to_string()
    }
}

fn or_none(value: Option<i32>) -> String {
    value.map_or_else(|| "(none)".to_string(), |v| v.to_string())
}

/// Human-oriented rendering: the stripped output, or a status line.
fn shell_display(result: &ShellExecutionResult) -> String {
    if result.binary {
        return format!("[binary output: {} bytes]", result.raw_output.len());
    }
    if !result.combined_output.trim().is_empty() {
        return result.combined_output.clone();
    }
    if result.aborted {
        "Command cancelled".to_string()
    } else if let Some(signal) = result.signal {
        format!("Command terminated by signal {signal}")
    } else {
        match result.exit_code {
            Some(0) | None => String::new(),
            Some(code) => format!("Command exited with code {code}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    file_path: String,
    content: String,
}

/// Writes a whole file, creating parent directories as needed.
#[derive(Debug, Default)]
pub struct WriteFileTool;

impl WriteFileTool {
    fn target(args: &WriteFileArgs, working_dir: &Path) -> Result<PathBuf, ToolError> {
        if args.file_path.trim().is_empty() {
            return Err(ToolError::BadArgs {
                message: "file_path cannot be empty".to_string(),
            });
        }
        resolve_within(working_dir, Path::new(&args.file_path))
    }
}

/// Unified diff of `old` -> `new` labelled with `name`.
fn unified_diff(name: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{name}"), &format!("b/{name}"))
        .to_string()
}

fn display_name(path: &Path, working_dir: &Path) -> String {
    path.strip_prefix(working_dir)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn read_existing(path: &Path) -> Result<Option<String>, ToolError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ToolError::execution(
            WRITE_FILE_TOOL_NAME,
            format!("failed to read {}: {err}", path.display()),
        )),
    }
}

fn write_atomically(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    // Overwrites keep the target's mode; the temp file starts out owner-only.
    match std::fs::metadata(path) {
        Ok(existing) => tmp.as_file().set_permissions(existing.permissions())?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

impl ToolExecutor for WriteFileTool {
    fn name(&self) -> &str {
        WRITE_FILE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Write content to a file inside the working directory, replacing it if it exists."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file, absolute or relative to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "Full new content of the file"
                }
            },
            "required": ["file_path", "content"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Edit
    }

    fn confirmation_details(
        &self,
        args: &Value,
        ctx: &ToolCtx,
    ) -> Result<Option<ConfirmationDetails>, ToolError> {
        let typed: WriteFileArgs = parse_args(args)?;
        let path = Self::target(&typed, &ctx.working_dir)?;
        let current = read_existing(&path)?.unwrap_or_default();
        let file_name = display_name(&path, &ctx.working_dir);
        let diff = unified_diff(&file_name, &current, &typed.content);
        Ok(Some(ConfirmationDetails::Edit { file_name, diff }))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: WriteFileArgs = parse_args(&args)?;
            let path = Self::target(&typed, &ctx.working_dir)?;
            if ctx.cancel.is_cancelled() {
                return Err(ToolError::Cancelled {
                    tool: WRITE_FILE_TOOL_NAME.to_string(),
                });
            }

            let previous = read_existing(&path)?;
            let file_name = display_name(&path, &ctx.working_dir);
            let diff = unified_diff(
                &file_name,
                previous.as_deref().unwrap_or_default(),
                &typed.content,
            );

            let target = path.clone();
            let bytes = typed.content.into_bytes();
            tokio::task::spawn_blocking(move || write_atomically(&target, &bytes))
                .await
                .map_err(|err| ToolError::execution(WRITE_FILE_TOOL_NAME, err.to_string()))?
                .map_err(|err| {
                    ToolError::execution(
                        WRITE_FILE_TOOL_NAME,
                        format!("failed to write {}: {err}", path.display()),
                    )
                })?;

            let content = if previous.is_some() {
                format!("Successfully overwrote file: {}", path.display())
            } else {
                format!("Successfully created and wrote to new file: {}", path.display())
            };
            Ok(ToolOutput::text(content).with_display(diff))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anvil_exec::{DetectedShell, ExecutionSettings, ShellExecutionService};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::ToolEnvironment;

    fn env(dir: &Path) -> ToolEnvironment {
        ToolEnvironment {
            working_dir: dir.to_path_buf(),
            shell: Arc::new(ShellExecutionService::new(
                DetectedShell::posix_sh(),
                ExecutionSettings::default(),
            )),
            max_output_bytes: 64 * 1024,
        }
    }

    #[test]
    fn resolve_within_rejects_escapes() {
        let root = Path::new("/work/project");
        assert_eq!(
            resolve_within(root, Path::new("src/./lib.rs")).unwrap(),
            PathBuf::from("/work/project/src/lib.rs")
        );
        assert!(resolve_within(root, Path::new("../other")).is_err());
        assert!(resolve_within(root, Path::new("/etc/passwd")).is_err());
        assert!(resolve_within(root, Path::new("a/../../project/b")).is_ok());
    }

    #[test]
    fn shell_validation_rejects_absolute_directory() {
        let err = ShellTool
            .validate(&json!({"command": "ls", "directory": "/tmp"}))
            .unwrap_err();
        assert!(matches!(err, ToolError::BadArgs { .. }));
    }

    #[test]
    fn shell_validation_rejects_blank_command() {
        assert!(ShellTool.validate(&json!({"command": "  "})).is_err());
        assert!(ShellTool.validate(&json!({"cmd": "ls"})).is_err());
    }

    #[test]
    fn shell_confirmation_lists_roots() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = env(dir.path()).ctx("c1", CancellationToken::new(), None);
        let details = ShellTool
            .confirmation_details(&json!({"command": "git add . && git commit"}), &ctx)
            .unwrap()
            .unwrap();
        assert_eq!(
            details,
            ConfirmationDetails::Exec {
                root_command: "git".into(),
                full_command: "git add . && git commit".into(),
            }
        );
    }

    #[test]
    fn formatted_result_lists_every_field() {
        let args = ShellArgs {
            command: "false".into(),
            description: None,
            directory: None,
        };
        let result = ShellExecutionResult {
            exit_code: Some(1),
            ..ShellExecutionResult::spawn_failed("x", std::time::Duration::ZERO)
        };
        let result = ShellExecutionResult {
            spawn_error: None,
            ..result
        };
        let text = format_shell_result(&args, &result);
        assert_eq!(
            text,
            "Command: false\nDirectory: (root)\nStdout: (empty)\nStderr: (empty)\n\
             Error: (none)\nExit Code: 1\nSignal: (none)"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_tool_runs_and_streams() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let mut ctx = env(dir.path()).ctx("c1", CancellationToken::new(), Some(tx));
        let output = ShellTool
            .execute(json!({"command": "echo hello"}), &mut ctx)
            .await
            .unwrap();
        drop(ctx);

        assert!(output.content.contains("Stdout: hello"));
        assert!(output.content.contains("Exit Code: 0"));
        assert_eq!(output.display.as_deref(), Some("hello\n"));
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.signal, None);
        assert!(!output.aborted);
        let mut streamed = String::new();
        while let Some(chunk) = rx.recv().await {
            if let ToolOutputChunk::Shell(anvil_types::ShellOutputEvent::Data { chunk, .. }) =
                chunk
            {
                streamed.push_str(&chunk);
            }
        }
        assert_eq!(streamed, "hello\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_tool_runs_in_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut ctx = env(dir.path()).ctx("c1", CancellationToken::new(), None);
        let output = ShellTool
            .execute(json!({"command": "basename \"$PWD\"", "directory": "sub"}), &mut ctx)
            .await
            .unwrap();
        assert!(output.content.contains("Directory: sub"));
        assert!(output.content.contains("Stdout: sub"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_tool_reports_spawn_failure_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = env(dir.path()).ctx("c1", CancellationToken::new(), None);
        let err = ShellTool
            .execute(json!({"command": "true", "directory": "missing"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn write_file_creates_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = env(dir.path()).ctx("c1", CancellationToken::new(), None);

        let created = WriteFileTool
            .execute(json!({"file_path": "nested/a.txt", "content": "one\n"}), &mut ctx)
            .await
            .unwrap();
        assert!(created.content.starts_with("Successfully created"));
        let path = dir.path().join("nested/a.txt");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\n");

        let overwritten = WriteFileTool
            .execute(json!({"file_path": "nested/a.txt", "content": "two\n"}), &mut ctx)
            .await
            .unwrap();
        assert!(overwritten.content.starts_with("Successfully overwrote"));
        assert!(overwritten.display.unwrap().contains("+two"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two\n");
    }

    #[test]
    fn write_file_confirmation_carries_diff() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "old\n").unwrap();
        let ctx = env(dir.path()).ctx("c1", CancellationToken::new(), None);
        let details = WriteFileTool
            .confirmation_details(&json!({"file_path": "a.txt", "content": "new\n"}), &ctx)
            .unwrap()
            .unwrap();
        match details {
            ConfirmationDetails::Edit { file_name, diff } => {
                assert_eq!(file_name, "a.txt");
                assert!(diff.contains("--- a/a.txt"));
                assert!(diff.contains("-old"));
                assert!(diff.contains("+new"));
            }
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[test]
    fn write_file_rejects_paths_outside_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = env(dir.path()).ctx("c1", CancellationToken::new(), None);
        let err = WriteFileTool
            .confirmation_details(&json!({"file_path": "../escape.txt", "content": ""}), &ctx)
            .unwrap_err();
        assert!(matches!(err, ToolError::BadArgs { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn write_file_keeps_mode_of_overwritten_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut ctx = env(dir.path()).ctx("c1", CancellationToken::new(), None);
        WriteFileTool
            .execute(
                json!({"file_path": "run.sh", "content": "#!/bin/sh\necho hi\n"}),
                &mut ctx,
            )
            .await
            .unwrap();

        let mode = std::fs::metadata(&script).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
        assert_eq!(
            std::fs::read_to_string(&script).unwrap(),
            "#!/bin/sh\necho hi\n"
        );
    }

    #[tokio::test]
    async fn write_file_honours_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut ctx = env(dir.path()).ctx("c1", cancel, None);
        let err = WriteFileTool
            .execute(json!({"file_path": "a.txt", "content": "x"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled { .. }));
        assert!(!dir.path().join("a.txt").exists());
    }
}
