//! Per-call bookkeeping owned by the scheduler.

use std::time::Duration;

use anvil_tools::ToolOutputChunk;
use anvil_types::{
    ConfirmationDetails, ConfirmationOutcome, ShellOutputEvent, ToolCallRequest, ToolCallResponse,
    ToolCallState,
};

/// Bound of the per-call channel a running tool streams into.
pub(crate) const LIVE_OUTPUT_CAPACITY: usize = 64;

/// Rendering of the output a tool has streamed so far.
///
/// Both execution paths keep one per call so a call cancelled mid-stream
/// settles with the same partial output either way.
#[derive(Debug, Default)]
pub(crate) struct LiveOutput {
    text: Option<String>,
}

impl LiveOutput {
    pub fn observe(&mut self, chunk: &ToolOutputChunk) {
        let live = self.text.get_or_insert_with(String::new);
        match chunk {
            ToolOutputChunk::Text(text)
            | ToolOutputChunk::Shell(ShellOutputEvent::Data { chunk: text, .. }) => {
                live.push_str(text);
            }
            ToolOutputChunk::Shell(ShellOutputEvent::BinaryDetected) => {
                *live = "[receiving binary output]".to_string();
            }
            ToolOutputChunk::Shell(ShellOutputEvent::BinaryProgress { bytes_received }) => {
                *live = format!("[receiving binary output: {bytes_received} bytes]");
            }
        }
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

/// Mutable state of one scheduled call. Only the scheduler touches it.
#[derive(Debug)]
pub(crate) struct ToolCallRecord {
    pub request: ToolCallRequest,
    state: ToolCallState,
    pub details: Option<ConfirmationDetails>,
    pub outcome: Option<ConfirmationOutcome>,
    pub live_output: LiveOutput,
}

impl ToolCallRecord {
    pub fn new(request: ToolCallRequest) -> Self {
        Self {
            request,
            state: ToolCallState::Validating,
            details: None,
            outcome: None,
            live_output: LiveOutput::default(),
        }
    }

    pub fn state(&self) -> ToolCallState {
        self.state
    }

    /// Move along a legal lifecycle edge. Illegal edges are refused.
    pub fn transition(&mut self, next: ToolCallState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::error!(
                call_id = %self.request.call_id,
                from = %self.state,
                to = %next,
                "refusing illegal tool call transition"
            );
            return false;
        }
        self.state = next;
        true
    }
}

/// A call that reached a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedToolCall {
    pub request: ToolCallRequest,
    /// `Success`, `Error`, or `Cancelled`.
    pub state: ToolCallState,
    pub response: ToolCallResponse,
    /// Decision of the confirming party, when one was asked.
    pub outcome: Option<ConfirmationOutcome>,
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_types::OutputStream;
    use serde_json::json;

    fn record() -> ToolCallRecord {
        ToolCallRecord::new(ToolCallRequest::new("c1", "t", json!({})))
    }

    #[test]
    fn legal_path_is_accepted() {
        let mut record = record();
        assert!(record.transition(ToolCallState::Scheduled));
        assert!(record.transition(ToolCallState::AwaitingApproval));
        assert!(record.transition(ToolCallState::Executing));
        assert!(record.transition(ToolCallState::Success));
        assert_eq!(record.state(), ToolCallState::Success);
    }

    #[test]
    fn terminal_state_is_final() {
        let mut record = record();
        assert!(record.transition(ToolCallState::Error));
        assert!(!record.transition(ToolCallState::Cancelled));
        assert!(!record.transition(ToolCallState::Executing));
        assert_eq!(record.state(), ToolCallState::Error);
    }

    #[test]
    fn executing_requires_scheduling() {
        let mut record = record();
        assert!(!record.transition(ToolCallState::Executing));
        assert_eq!(record.state(), ToolCallState::Validating);
    }

    #[test]
    fn live_output_switches_to_binary_progress() {
        let mut live = LiveOutput::default();
        assert_eq!(live.as_deref(), None);
        live.observe(&ToolOutputChunk::Shell(ShellOutputEvent::Data {
            stream: OutputStream::Stdout,
            chunk: "abc".into(),
        }));
        assert_eq!(live.as_deref(), Some("abc"));
        live.observe(&ToolOutputChunk::Shell(ShellOutputEvent::BinaryProgress {
            bytes_received: 10,
        }));
        assert_eq!(live.as_deref(), Some("[receiving binary output: 10 bytes]"));
    }
}
