use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single tool invocation requested by the model.
///
/// Immutable once submitted. `call_id` is unique within a batch and is the
/// only key used to correlate updates, confirmations, and results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub args: Value,
    /// Identifier of the prompt that produced this call (for logging).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
}

impl ToolCallRequest {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            args,
            prompt_id: None,
        }
    }

    #[must_use]
    pub fn with_prompt_id(mut self, prompt_id: impl Into<String>) -> Self {
        self.prompt_id = Some(prompt_id.into());
        self
    }
}

/// Lifecycle state of one tool call.
///
/// ```text
/// Validating -> Scheduled -> [AwaitingApproval] -> Executing -> Success | Error | Cancelled
/// ```
///
/// Any non-terminal state may also short-circuit to `Error` or `Cancelled`.
/// Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallState {
    Validating,
    Scheduled,
    AwaitingApproval,
    Executing,
    Success,
    Error,
    Cancelled,
}

impl ToolCallState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal lifecycle edge.
    #[must_use]
    pub fn can_transition_to(self, next: ToolCallState) -> bool {
        use ToolCallState::{
            AwaitingApproval, Cancelled, Error, Executing, Scheduled, Success, Validating,
        };
        match (self, next) {
            (Validating, Scheduled)
            | (Scheduled, AwaitingApproval | Executing)
            | (AwaitingApproval, Executing)
            | (Executing, Success) => true,
            (from, Error | Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ToolCallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validating => "validating",
            Self::Scheduled => "scheduled",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Classification carried by failed or cancelled tool call results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorType {
    /// No tool with the requested name is registered.
    ToolNotRegistered,
    /// Arguments failed validation before scheduling proceeded.
    InvalidParams,
    /// The tool's own execute reported a failure.
    ExecutionFailed,
    /// The tool panicked while executing.
    UnhandledException,
    /// External modification of the call's content failed.
    ModificationFailed,
    /// The call was cancelled before or during execution.
    Cancelled,
}

impl fmt::Display for ToolErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ToolNotRegistered => "tool_not_registered",
            Self::InvalidParams => "invalid_params",
            Self::ExecutionFailed => "execution_failed",
            Self::UnhandledException => "unhandled_exception",
            Self::ModificationFailed => "modification_failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Terminal result of one tool call.
///
/// The scheduler and the non-interactive executor both produce exactly this
/// shape, so consumers never need to know which path ran a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub call_id: String,
    /// Content handed back to the model.
    pub content: String,
    /// Optional human-oriented rendering of the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ToolErrorType>,
    /// Exit code of the process behind the call, when one ran and exited
    /// normally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Signal that terminated that process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    /// Set when the call ended because it was cancelled.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub aborted: bool,
}

impl ToolCallResponse {
    pub fn success(
        call_id: impl Into<String>,
        content: impl Into<String>,
        display: Option<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            display,
            error: None,
            error_type: None,
            exit_code: None,
            signal: None,
            aborted: false,
        }
    }

    pub fn error(
        call_id: impl Into<String>,
        error_type: ToolErrorType,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            call_id: call_id.into(),
            content: message.clone(),
            display: Some(message.clone()),
            error: Some(message),
            error_type: Some(error_type),
            exit_code: None,
            signal: None,
            aborted: false,
        }
    }

    /// A cancelled result. `content` may carry partial output gathered before
    /// cancellation took effect.
    pub fn cancelled(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            call_id: call_id.into(),
            display: Some(content.clone()),
            content,
            error: None,
            error_type: Some(ToolErrorType::Cancelled),
            exit_code: None,
            signal: None,
            aborted: true,
        }
    }

    /// Attach how the underlying process ended.
    #[must_use]
    pub fn with_exit(mut self, exit_code: Option<i32>, signal: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self.signal = signal;
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_states_are_final() {
        for terminal in [
            ToolCallState::Success,
            ToolCallState::Error,
            ToolCallState::Cancelled,
        ] {
            for next in [
                ToolCallState::Validating,
                ToolCallState::Scheduled,
                ToolCallState::AwaitingApproval,
                ToolCallState::Executing,
                ToolCallState::Success,
                ToolCallState::Error,
                ToolCallState::Cancelled,
            ] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} -> {next} must be rejected"
                );
            }
        }
    }

    #[test]
    fn approval_is_optional_on_the_happy_path() {
        assert!(ToolCallState::Scheduled.can_transition_to(ToolCallState::Executing));
        assert!(ToolCallState::Scheduled.can_transition_to(ToolCallState::AwaitingApproval));
        assert!(ToolCallState::AwaitingApproval.can_transition_to(ToolCallState::Executing));
    }

    #[test]
    fn success_only_reachable_from_executing() {
        assert!(!ToolCallState::Scheduled.can_transition_to(ToolCallState::Success));
        assert!(!ToolCallState::AwaitingApproval.can_transition_to(ToolCallState::Success));
        assert!(ToolCallState::Executing.can_transition_to(ToolCallState::Success));
    }

    #[test]
    fn no_backwards_edges() {
        assert!(!ToolCallState::Executing.can_transition_to(ToolCallState::AwaitingApproval));
        assert!(!ToolCallState::Scheduled.can_transition_to(ToolCallState::Validating));
    }

    #[test]
    fn error_response_mirrors_message() {
        let response = ToolCallResponse::error("c1", ToolErrorType::ExecutionFailed, "boom");
        assert!(response.is_error());
        assert_eq!(response.content, "boom");
        assert_eq!(response.error.as_deref(), Some("boom"));
        assert_eq!(response.error_type, Some(ToolErrorType::ExecutionFailed));
    }

    #[test]
    fn cancelled_response_is_not_an_error() {
        let response = ToolCallResponse::cancelled("c1", "partial");
        assert!(!response.is_error());
        assert!(response.aborted);
        assert_eq!(response.error_type, Some(ToolErrorType::Cancelled));
    }

    #[test]
    fn exit_status_serializes_only_when_present() {
        let plain = serde_json::to_value(ToolCallResponse::success("c1", "ok", None)).unwrap();
        assert!(plain.get("exit_code").is_none());
        assert!(plain.get("aborted").is_none());

        let exited = ToolCallResponse::success("c1", "ok", None).with_exit(Some(3), None);
        let value = serde_json::to_value(&exited).unwrap();
        assert_eq!(value["exit_code"], 3);
        let back: ToolCallResponse = serde_json::from_value(value).unwrap();
        assert_eq!(back, exited);
    }

    #[test]
    fn request_serializes_without_absent_prompt_id() {
        let request = ToolCallRequest::new("c1", "run_shell_command", json!({"command": "ls"}));
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("prompt_id").is_none());

        let with_prompt = request.with_prompt_id("p-7");
        assert_eq!(with_prompt.prompt_id.as_deref(), Some("p-7"));
    }
}
