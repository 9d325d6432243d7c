//! Single-call execution without confirmation, for headless callers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use anvil_tools::{ToolEnvironment, ToolRegistry};
use anvil_types::{ToolCallRequest, ToolCallResponse};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::record::{LIVE_OUTPUT_CAPACITY, LiveOutput};
use crate::settle::{self, Settled};
use crate::telemetry::{self, ToolCallEvent, ToolCallLogger, TracingToolCallLogger};

/// Runs one call straight through: lookup, validation, execution.
///
/// Nothing is confirmed and no live output is published; the caller has
/// already decided the call may run. Streamed chunks are still collected so
/// responses match what the scheduler produces for the same call.
pub struct NonInteractiveExecutor {
    registry: Arc<ToolRegistry>,
    env: ToolEnvironment,
    logger: Arc<dyn ToolCallLogger>,
}

impl NonInteractiveExecutor {
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, env: ToolEnvironment) -> Self {
        Self {
            registry,
            env,
            logger: Arc::new(TracingToolCallLogger),
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn ToolCallLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub async fn execute_one(
        &self,
        request: ToolCallRequest,
        cancel: CancellationToken,
    ) -> ToolCallResponse {
        let started = Instant::now();
        let driven = AssertUnwindSafe(self.drive(&request, &cancel))
            .catch_unwind()
            .await;
        let settled = match driven {
            Ok(settled) => settled,
            Err(payload) => settle::panicked(&request.call_id, &request.name, payload.as_ref()),
        };

        let duration = started.elapsed();
        tracing::debug!(
            call_id = %request.call_id,
            tool = %request.name,
            state = %settled.state,
            elapsed_ms = duration.as_millis(),
            "non-interactive tool call finished"
        );
        let event = ToolCallEvent::new(&request, &request.args, &settled.response, None, duration);
        telemetry::emit(self.logger.as_ref(), &event);
        settled.response
    }

    async fn drive(&self, request: &ToolCallRequest, cancel: &CancellationToken) -> Settled {
        let call_id = request.call_id.as_str();
        let tool = match self.registry.lookup(&request.name) {
            Ok(tool) => tool,
            Err(err) => return settle::failure(call_id, &err),
        };
        if let Err(err) = tool.validate(&request.args) {
            return settle::failure(call_id, &err);
        }
        if cancel.is_cancelled() {
            return settle::cancelled(call_id, settle::CANCELLED_BEFORE_EXECUTION);
        }

        let (output_tx, mut output_rx) = mpsc::channel(LIVE_OUTPUT_CAPACITY);
        let mut ctx = self.env.ctx(call_id, cancel.clone(), Some(output_tx));
        let args: Value = request.args.clone();
        let execution = async move {
            let result = tool.execute(args, &mut ctx).await;
            drop(ctx);
            result
        };
        let mut live = LiveOutput::default();
        let collect = async {
            while let Some(chunk) = output_rx.recv().await {
                live.observe(&chunk);
            }
        };
        let (result, ()) = tokio::join!(execution, collect);
        settle::executed(call_id, result, cancel.is_cancelled(), live.as_deref())
    }
}
