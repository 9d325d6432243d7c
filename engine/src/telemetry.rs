//! Structured per-call log events.

use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anvil_types::{ConfirmationOutcome, ToolCallRequest, ToolCallResponse, ToolErrorType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// One record per terminal tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallEvent {
    pub call_id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    /// Arguments the tool actually ran with (after any external edit).
    pub args: Value,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ToolErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<ConfirmationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
}

impl ToolCallEvent {
    #[must_use]
    pub fn new(
        request: &ToolCallRequest,
        args: &Value,
        response: &ToolCallResponse,
        decision: Option<ConfirmationOutcome>,
        duration: Duration,
    ) -> Self {
        Self {
            call_id: request.call_id.clone(),
            name: request.name.clone(),
            timestamp: Utc::now(),
            args: args.clone(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            success: response.error_type.is_none(),
            error: response.error.clone(),
            error_type: response.error_type,
            decision,
            prompt_id: request.prompt_id.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to serialize tool call event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write tool call event: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives one event per terminal call. Errors never affect the call.
pub trait ToolCallLogger: Send + Sync {
    fn log(&self, event: &ToolCallEvent) -> Result<(), LogError>;
}

/// Emits events as structured `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingToolCallLogger;

impl ToolCallLogger for TracingToolCallLogger {
    fn log(&self, event: &ToolCallEvent) -> Result<(), LogError> {
        let args = serde_json::to_string(&event.args)?;
        tracing::info!(
            target: "anvil::tool_call",
            call_id = %event.call_id,
            name = %event.name,
            timestamp = %event.timestamp.to_rfc3339(),
            duration_ms = event.duration_ms,
            success = event.success,
            error = ?event.error,
            error_type = ?event.error_type,
            decision = ?event.decision,
            prompt_id = ?event.prompt_id,
            args = %args,
            "tool call finished"
        );
        Ok(())
    }
}

/// Appends each event as one JSON line to a writer.
#[derive(Debug)]
pub struct JsonLinesToolCallLogger<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesToolCallLogger<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> ToolCallLogger for JsonLinesToolCallLogger<W> {
    fn log(&self, event: &ToolCallEvent) -> Result<(), LogError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }
}

/// Hand `event` to `logger`, containing any failure.
pub(crate) fn emit(logger: &dyn ToolCallLogger, event: &ToolCallEvent) {
    match std::panic::catch_unwind(AssertUnwindSafe(|| logger.log(event))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(call_id = %event.call_id, "failed to log tool call: {err}");
        }
        Err(_) => {
            tracing::warn!(call_id = %event.call_id, "tool call logger panicked");
        }
    }
}
