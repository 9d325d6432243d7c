//! Interactive tool-call scheduler.
//!
//! A batch of requests runs concurrently. Each call walks
//! `Validating -> Scheduled -> [AwaitingApproval] -> Executing -> terminal`,
//! every edge is published as a [`ToolCallUpdate`], and the batch resolves to
//! one [`CompletedToolCall`] per request in request order.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use anvil_tools::{ToolEnvironment, ToolError, ToolExecutor, ToolOutputChunk, ToolRegistry};
use anvil_types::{
    ConfirmationDetails, ConfirmationOutcome, ToolCallRequest, ToolCallState, ToolErrorType,
};
use futures_util::FutureExt;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::confirmation::{ConfirmationHandler, ConfirmationRequest, ExternalEditor};
use crate::policy::{ApprovalMode, SessionAllowList};
use crate::record::{CompletedToolCall, LIVE_OUTPUT_CAPACITY, ToolCallRecord};
use crate::settle::{self, CANCELLED_BEFORE_EXECUTION, CANCELLED_BY_USER, Settled};
use crate::telemetry::{self, ToolCallEvent, ToolCallLogger, TracingToolCallLogger};

const DEFAULT_UPDATE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub approval_mode: ApprovalMode,
    /// Bound of the update channel. Producers wait when it is full.
    pub update_capacity: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            approval_mode: ApprovalMode::default(),
            update_capacity: DEFAULT_UPDATE_CAPACITY,
        }
    }
}

impl SchedulerSettings {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            approval_mode: config.approval.mode,
            update_capacity: config.execution.event_channel_capacity(),
        }
    }
}

/// Progress of one call within a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallUpdate {
    StateChanged {
        call_id: String,
        state: ToolCallState,
    },
    /// The call is waiting on the confirmation handler.
    AwaitingApproval {
        call_id: String,
        details: ConfirmationDetails,
    },
    Output {
        call_id: String,
        chunk: ToolOutputChunk,
    },
}

impl ToolCallUpdate {
    #[must_use]
    pub fn call_id(&self) -> &str {
        match self {
            Self::StateChanged { call_id, .. }
            | Self::AwaitingApproval { call_id, .. }
            | Self::Output { call_id, .. } => call_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("tool call batch task failed: {0}")]
    Batch(#[from] JoinError),
}

pub struct ToolScheduler {
    registry: Arc<ToolRegistry>,
    env: ToolEnvironment,
    confirmer: Arc<dyn ConfirmationHandler>,
    editor: Option<Arc<dyn ExternalEditor>>,
    logger: Arc<dyn ToolCallLogger>,
    allow_list: Arc<SessionAllowList>,
    settings: SchedulerSettings,
}

impl ToolScheduler {
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        env: ToolEnvironment,
        confirmer: Arc<dyn ConfirmationHandler>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            registry,
            env,
            confirmer,
            editor: None,
            logger: Arc::new(TracingToolCallLogger),
            allow_list: Arc::new(SessionAllowList::new()),
            settings,
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn ToolCallLogger>) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub fn with_editor(mut self, editor: Arc<dyn ExternalEditor>) -> Self {
        self.editor = Some(editor);
        self
    }

    /// Share approvals with another scheduler of the same session.
    #[must_use]
    pub fn with_allow_list(mut self, allow_list: Arc<SessionAllowList>) -> Self {
        self.allow_list = allow_list;
        self
    }

    /// Approvals granted so far this session. Shared by every batch.
    #[must_use]
    pub fn allow_list(&self) -> &SessionAllowList {
        &self.allow_list
    }

    #[must_use]
    pub fn settings(&self) -> SchedulerSettings {
        self.settings
    }

    /// Start a batch. Calls run concurrently; cancelling `cancel` cancels
    /// every call that has not reached a terminal state.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(
        &self,
        requests: Vec<ToolCallRequest>,
        cancel: CancellationToken,
    ) -> ScheduledBatch {
        warn_on_duplicate_ids(&requests);
        let (tx, rx) = mpsc::channel(self.settings.update_capacity.max(1));
        let runner = Arc::new(BatchRunner {
            registry: Arc::clone(&self.registry),
            env: self.env.clone(),
            confirmer: Arc::clone(&self.confirmer),
            editor: self.editor.clone(),
            logger: Arc::clone(&self.logger),
            allow_list: Arc::clone(&self.allow_list),
            mode: self.settings.approval_mode,
            updates: UpdateSink { tx },
        });
        tracing::debug!(calls = requests.len(), "scheduling tool call batch");

        let task = tokio::spawn(async move {
            let calls = requests.into_iter().map(|request| {
                let runner = Arc::clone(&runner);
                let cancel = cancel.clone();
                async move { runner.run(request, cancel).await }
            });
            join_all(calls).await
        });

        ScheduledBatch { updates: rx, task }
    }
}

fn warn_on_duplicate_ids(requests: &[ToolCallRequest]) {
    let mut seen = HashSet::new();
    for request in requests {
        if !seen.insert(request.call_id.as_str()) {
            tracing::warn!(call_id = %request.call_id, "duplicate call id in batch");
        }
    }
}

/// A running batch.
#[derive(Debug)]
pub struct ScheduledBatch {
    updates: mpsc::Receiver<ToolCallUpdate>,
    task: JoinHandle<Vec<CompletedToolCall>>,
}

impl ScheduledBatch {
    /// Next update, or `None` once every call has finished.
    pub async fn next_update(&mut self) -> Option<ToolCallUpdate> {
        self.updates.recv().await
    }

    /// Wait for every call. Updates not yet received are discarded.
    pub async fn complete(self) -> Result<Vec<CompletedToolCall>, SchedulerError> {
        let Self { updates, task } = self;
        drop(updates);
        Ok(task.await?)
    }
}

/// Update producer. Sends stop once the receiver is gone.
struct UpdateSink {
    tx: mpsc::Sender<ToolCallUpdate>,
}

impl UpdateSink {
    async fn send(&self, update: ToolCallUpdate) {
        if self.tx.is_closed() {
            return;
        }
        if self.tx.send(update).await.is_err() {
            tracing::trace!("tool call update receiver dropped");
        }
    }
}

struct BatchRunner {
    registry: Arc<ToolRegistry>,
    env: ToolEnvironment,
    confirmer: Arc<dyn ConfirmationHandler>,
    editor: Option<Arc<dyn ExternalEditor>>,
    logger: Arc<dyn ToolCallLogger>,
    allow_list: Arc<SessionAllowList>,
    mode: ApprovalMode,
    updates: UpdateSink,
}

impl BatchRunner {
    async fn run(&self, request: ToolCallRequest, cancel: CancellationToken) -> CompletedToolCall {
        let started = Instant::now();
        let mut record = ToolCallRecord::new(request);
        let mut args = record.request.args.clone();
        self.updates
            .send(ToolCallUpdate::StateChanged {
                call_id: record.request.call_id.clone(),
                state: record.state(),
            })
            .await;

        let driven = AssertUnwindSafe(self.drive(&mut record, &mut args, &cancel))
            .catch_unwind()
            .await;
        let settled = match driven {
            Ok(settled) => settled,
            Err(payload) => settle::panicked(
                &record.request.call_id,
                &record.request.name,
                payload.as_ref(),
            ),
        };
        self.finish(record, &args, settled, started).await
    }

    async fn finish(
        &self,
        mut record: ToolCallRecord,
        args: &Value,
        settled: Settled,
        started: Instant,
    ) -> CompletedToolCall {
        let duration = started.elapsed();
        self.advance(&mut record, settled.state).await;
        tracing::debug!(
            call_id = %record.request.call_id,
            tool = %record.request.name,
            state = %record.state(),
            elapsed_ms = duration.as_millis(),
            "tool call finished"
        );

        let event = ToolCallEvent::new(
            &record.request,
            args,
            &settled.response,
            record.outcome,
            duration,
        );
        telemetry::emit(self.logger.as_ref(), &event);

        CompletedToolCall {
            state: record.state(),
            request: record.request,
            response: settled.response,
            outcome: record.outcome,
            duration,
        }
    }

    async fn advance(&self, record: &mut ToolCallRecord, state: ToolCallState) {
        if record.transition(state) {
            self.updates
                .send(ToolCallUpdate::StateChanged {
                    call_id: record.request.call_id.clone(),
                    state,
                })
                .await;
        }
    }

    fn needs_confirmation(&self, tool_name: &str, details: &ConfirmationDetails) -> bool {
        !self.mode.skips_confirmation(details) && !self.allow_list.permits(tool_name, details)
    }

    /// Everything between `Validating` and the terminal state. `args` ends up
    /// holding the arguments the tool ran with.
    async fn drive(
        &self,
        record: &mut ToolCallRecord,
        args: &mut Value,
        cancel: &CancellationToken,
    ) -> Settled {
        let call_id = record.request.call_id.clone();
        let tool = match self.registry.lookup(&record.request.name) {
            Ok(tool) => tool,
            Err(err) => return settle::failure(&call_id, &err),
        };
        if let Err(err) = tool.validate(args) {
            return settle::failure(&call_id, &err);
        }

        let mut ctx = self.env.ctx(call_id.clone(), cancel.clone(), None);
        self.advance(record, ToolCallState::Scheduled).await;
        if cancel.is_cancelled() {
            return settle::cancelled(&call_id, CANCELLED_BEFORE_EXECUTION);
        }

        record.details = match tool.confirmation_details(args, &ctx) {
            Ok(details) => details,
            Err(err) => return settle::failure(&call_id, &err),
        };
        let pending = record
            .details
            .clone()
            .filter(|details| self.needs_confirmation(tool.name(), details));

        if let Some(details) = pending {
            self.advance(record, ToolCallState::AwaitingApproval).await;
            self.updates
                .send(ToolCallUpdate::AwaitingApproval {
                    call_id: call_id.clone(),
                    details: details.clone(),
                })
                .await;

            let request = ConfirmationRequest {
                call_id: call_id.clone(),
                tool_name: tool.name().to_string(),
                args: args.clone(),
                details,
            };
            let outcome = tokio::select! {
                outcome = self.confirmer.confirm(request.clone()) => outcome,
                () = cancel.cancelled() => {
                    return settle::cancelled(&call_id, CANCELLED_BEFORE_EXECUTION);
                }
            };
            record.outcome = Some(outcome);
            tracing::debug!(%call_id, %outcome, "confirmation resolved");

            match outcome {
                ConfirmationOutcome::Cancel => {
                    return settle::cancelled(&call_id, CANCELLED_BY_USER);
                }
                ConfirmationOutcome::ModifyExternally => {
                    let revised = match self.modify(&request, cancel).await {
                        Ok(revised) => revised,
                        Err(settled) => return settled,
                    };
                    if let Err(err) = tool.validate(&revised) {
                        return settle::failure(&call_id, &err);
                    }
                    *args = revised;
                }
                ConfirmationOutcome::ProceedOnce => {}
                always => {
                    self.allow_list.record(always, tool.name(), &request.details);
                }
            }
        }

        if cancel.is_cancelled() {
            return settle::cancelled(&call_id, CANCELLED_BEFORE_EXECUTION);
        }
        self.advance(record, ToolCallState::Executing).await;

        let (output_tx, mut output_rx) = mpsc::channel(LIVE_OUTPUT_CAPACITY);
        ctx.output = Some(output_tx);
        let exec_args = args.clone();
        let exec_tool: Arc<dyn ToolExecutor> = Arc::clone(&tool);
        let execution = async move {
            let result = exec_tool.execute(exec_args, &mut ctx).await;
            // Closes the live channel so forwarding ends.
            drop(ctx);
            result
        };
        let forward = async {
            while let Some(chunk) = output_rx.recv().await {
                record.live_output.observe(&chunk);
                self.updates
                    .send(ToolCallUpdate::Output {
                        call_id: call_id.clone(),
                        chunk,
                    })
                    .await;
            }
        };
        let (result, ()) = tokio::join!(execution, forward);

        settle::executed(
            &call_id,
            result,
            cancel.is_cancelled(),
            record.live_output.as_deref(),
        )
    }

    async fn modify(
        &self,
        request: &ConfirmationRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, Settled> {
        let Some(editor) = &self.editor else {
            return Err(settle::failure_with(
                &request.call_id,
                ToolErrorType::ModificationFailed,
                "No external editor is available to modify this call.",
            ));
        };
        let edited = tokio::select! {
            edited = editor.edit(request, &request.details) => edited,
            () = cancel.cancelled() => {
                return Err(settle::cancelled(&request.call_id, CANCELLED_BEFORE_EXECUTION));
            }
        };
        edited.map_err(|err| match err {
            ToolError::Cancelled { .. } => settle::cancelled(&request.call_id, CANCELLED_BY_USER),
            err => settle::failure_with(
                &request.call_id,
                ToolErrorType::ModificationFailed,
                err.to_string(),
            ),
        })
    }
}
