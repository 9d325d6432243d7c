//! Tool executor contract, registry, and argument helpers.

pub mod builtins;
pub mod commands;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use anvil_exec::ShellExecutionService;
use anvil_types::{ConfirmationDetails, ShellOutputEvent, ToolErrorType};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use builtins::register_builtins;
pub use commands::command_roots;

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;

/// Broad category of a tool, used by approval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Read,
    Edit,
    Execute,
    Fetch,
    Mcp,
    Other,
}

/// What a tool produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutput {
    /// Text returned to the requester.
    pub content: String,
    /// Optional human-oriented rendering.
    pub display: Option<String>,
    /// Exit code of a process the tool ran.
    pub exit_code: Option<i32>,
    /// Signal that terminated that process.
    pub signal: Option<i32>,
    /// The tool stopped early because the call was cancelled.
    pub aborted: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    #[must_use]
    pub fn with_exit(
        mut self,
        exit_code: Option<i32>,
        signal: Option<i32>,
        aborted: bool,
    ) -> Self {
        self.exit_code = exit_code;
        self.signal = signal;
        self.aborted = aborted;
        self
    }
}

/// Live output produced while a tool runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutputChunk {
    Shell(ShellOutputEvent),
    Text(String),
}

pub type ToolOutputSink = mpsc::Sender<ToolOutputChunk>;

/// Error types for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Bad tool args: {message}")]
    BadArgs { message: String },
    #[error("Tool execution failed: {tool}: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("Tool \"{name}\" not found in registry")]
    UnknownTool { name: String },
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: String },
    #[error("Modification failed: {message}")]
    ModificationFailed { message: String },
    #[error("Tool cancelled: {tool}")]
    Cancelled { tool: String },
}

impl ToolError {
    pub fn execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Category recorded on the terminal response.
    #[must_use]
    pub fn error_type(&self) -> ToolErrorType {
        match self {
            Self::BadArgs { .. } => ToolErrorType::InvalidParams,
            Self::UnknownTool { .. } => ToolErrorType::ToolNotRegistered,
            Self::ExecutionFailed { .. } | Self::DuplicateTool { .. } => {
                ToolErrorType::ExecutionFailed
            }
            Self::ModificationFailed { .. } => ToolErrorType::ModificationFailed,
            Self::Cancelled { .. } => ToolErrorType::Cancelled,
        }
    }
}

/// A callable tool.
///
/// `validate` and `confirmation_details` run before any approval prompt;
/// `execute` runs only after the call has been approved.
pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    fn kind(&self) -> ToolKind;

    /// Reject malformed arguments. Defaults to JSON-schema validation.
    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        validate_args(&self.schema(), args)
    }

    /// What a confirming party needs to approve this call, or `None` when
    /// the call needs no approval.
    fn confirmation_details(
        &self,
        args: &Value,
        ctx: &ToolCtx,
    ) -> Result<Option<ConfirmationDetails>, ToolError>;

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a>;
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

/// Tools available to a session, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn register(&mut self, executor: Box<dyn ToolExecutor>) -> Result<(), ToolError> {
        let name = executor.name().to_string();
        if self.executors.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        self.executors.insert(name, Arc::from(executor));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn ToolExecutor>, ToolError> {
        self.executors
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Per-session settings shared by every call's [`ToolCtx`].
#[derive(Debug, Clone)]
pub struct ToolEnvironment {
    pub working_dir: PathBuf,
    pub shell: Arc<ShellExecutionService>,
    pub max_output_bytes: usize,
}

impl ToolEnvironment {
    /// Context for one call.
    #[must_use]
    pub fn ctx(
        &self,
        call_id: impl Into<String>,
        cancel: CancellationToken,
        output: Option<ToolOutputSink>,
    ) -> ToolCtx {
        ToolCtx {
            call_id: call_id.into(),
            working_dir: self.working_dir.clone(),
            cancel,
            output,
            shell: Arc::clone(&self.shell),
            max_output_bytes: self.max_output_bytes,
        }
    }
}

/// Per-call tool context.
#[derive(Debug)]
pub struct ToolCtx {
    pub call_id: String,
    pub working_dir: PathBuf,
    /// Shared by every call of the batch.
    pub cancel: CancellationToken,
    /// Live output; `None` when nobody is listening.
    pub output: Option<ToolOutputSink>,
    pub shell: Arc<ShellExecutionService>,
    pub max_output_bytes: usize,
}

impl ToolCtx {
    /// Send a live chunk. Stops emitting once the listener is gone.
    pub async fn emit(&mut self, chunk: ToolOutputChunk) {
        let Some(sink) = &self.output else {
            return;
        };
        if sink.send(chunk).await.is_err() {
            self.output = None;
        }
    }
}

/// Validate arguments against a JSON schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ToolError::BadArgs {
        message: format!("Invalid tool schema: {e}"),
    })?;
    if let Err(err) = validator.validate(args) {
        return Err(ToolError::BadArgs {
            message: err.to_string(),
        });
    }
    Ok(())
}

/// Truncate tool output to the effective maximum length.
#[must_use]
pub fn truncate_output(output: String, effective_max: usize) -> String {
    if output.len() <= effective_max {
        return output;
    }
    let marker = "\n\n... [output truncated]";
    if effective_max <= marker.len() {
        return marker[..effective_max].to_string();
    }
    let max_body = effective_max - marker.len();
    let mut end = max_body;
    while end > 0 && !output.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = output;
    truncated.truncate(end);
    truncated.push_str(marker);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl ToolExecutor for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text argument"
        }
        fn schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"],
                "additionalProperties": false
            })
        }
        fn kind(&self) -> ToolKind {
            ToolKind::Other
        }
        fn confirmation_details(
            &self,
            _args: &Value,
            _ctx: &ToolCtx,
        ) -> Result<Option<ConfirmationDetails>, ToolError> {
            Ok(None)
        }
        fn execute<'a>(&'a self, args: Value, _ctx: &'a mut ToolCtx) -> ToolFut<'a> {
            Box::pin(async move {
                let text = args["text"].as_str().unwrap_or_default().to_string();
                Ok(ToolOutput::text(text))
            })
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(Echo)).unwrap();
        let err = registry.register(Box::new(Echo)).unwrap_err();
        assert!(matches!(err, ToolError::DuplicateTool { name } if name == "echo"));
    }

    #[test]
    fn unknown_tool_names_the_tool() {
        let registry = ToolRegistry::default();
        let err = registry.lookup("nonexistent").err().unwrap();
        assert!(err.to_string().contains("nonexistent"));
        assert_eq!(err.error_type(), ToolErrorType::ToolNotRegistered);
    }

    #[test]
    fn default_validation_uses_schema() {
        assert!(Echo.validate(&json!({"text": "hi"})).is_ok());
        let err = Echo.validate(&json!({"text": 5})).unwrap_err();
        assert_eq!(err.error_type(), ToolErrorType::InvalidParams);
        assert!(Echo.validate(&json!({"text": "hi", "extra": 1})).is_err());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let output = "é".repeat(40);
        let truncated = truncate_output(output, 40);
        assert!(truncated.len() <= 40);
        assert!(truncated.ends_with("[output truncated]"));
    }

    #[test]
    fn short_output_is_untouched() {
        assert_eq!(truncate_output("ok".into(), 10), "ok");
    }
}
