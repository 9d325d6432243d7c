//! Terminal result shaping shared by the scheduler and the batch executor.
//!
//! Both execution paths build every terminal [`ToolCallResponse`] through
//! these functions so the same call yields the same response either way.

use std::any::Any;

use anvil_tools::{ToolError, ToolOutput};
use anvil_types::{ToolCallResponse, ToolCallState, ToolErrorType};

pub(crate) const CANCELLED_BEFORE_EXECUTION: &str = "Tool call cancelled before execution.";
pub(crate) const CANCELLED_BY_USER: &str = "Tool call cancelled by user.";
pub(crate) const CANCELLED_DURING_EXECUTION: &str = "Tool call cancelled during execution.";

#[derive(Debug)]
pub(crate) struct Settled {
    pub state: ToolCallState,
    pub response: ToolCallResponse,
}

pub(crate) fn failure(call_id: &str, err: &ToolError) -> Settled {
    failure_with(call_id, err.error_type(), err.to_string())
}

pub(crate) fn failure_with(
    call_id: &str,
    error_type: ToolErrorType,
    message: impl Into<String>,
) -> Settled {
    Settled {
        state: ToolCallState::Error,
        response: ToolCallResponse::error(call_id, error_type, message),
    }
}

pub(crate) fn cancelled(call_id: &str, message: &str) -> Settled {
    Settled {
        state: ToolCallState::Cancelled,
        response: ToolCallResponse::cancelled(call_id, message),
    }
}

pub(crate) fn panicked(call_id: &str, tool: &str, payload: &(dyn Any + Send)) -> Settled {
    let message = format!(
        "Tool {tool} panicked: {}",
        panic_payload_to_string(payload)
    );
    tracing::error!(call_id, tool, "{message}");
    failure_with(call_id, ToolErrorType::UnhandledException, message)
}

/// Shape the result of `execute`. `cancelled_now` is the batch token's state
/// once execution returned; `partial` is output streamed before that.
pub(crate) fn executed(
    call_id: &str,
    result: Result<ToolOutput, ToolError>,
    cancelled_now: bool,
    partial: Option<&str>,
) -> Settled {
    match result {
        Ok(output) if cancelled_now => {
            let mut response = ToolCallResponse::cancelled(call_id, output.content)
                .with_exit(output.exit_code, output.signal);
            if output.display.is_some() {
                response.display = output.display;
            }
            Settled {
                state: ToolCallState::Cancelled,
                response,
            }
        }
        Ok(output) => Settled {
            state: ToolCallState::Success,
            response: ToolCallResponse::success(call_id, output.content, output.display)
                .with_exit(output.exit_code, output.signal),
        },
        Err(err) if cancelled_now || matches!(err, ToolError::Cancelled { .. }) => {
            match partial.filter(|text| !text.trim().is_empty()) {
                Some(text) => cancelled(
                    call_id,
                    &format!("{CANCELLED_DURING_EXECUTION}\nOutput before cancellation:\n{text}"),
                ),
                None => cancelled(call_id, CANCELLED_DURING_EXECUTION),
            }
        }
        Err(err) => failure(call_id, &err),
    }
}

pub(crate) fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
