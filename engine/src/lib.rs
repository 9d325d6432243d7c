//! Tool-call orchestration for Anvil.
//!
//! - [`ToolScheduler`] runs batches of calls through validation, approval,
//!   and execution, publishing every state change as it happens.
//! - [`NonInteractiveExecutor`] runs a single call with no approval step.
//!
//! Both produce identical [`ToolCallResponse`](anvil_types::ToolCallResponse)s
//! for the same call and log one [`ToolCallEvent`] per terminal call.

mod config;
mod confirmation;
mod non_interactive;
mod policy;
mod record;
mod scheduler;
mod settle;
mod telemetry;

pub use config::{
    ApprovalConfig, CONFIG_ENV, ConfigError, EngineConfig, ExecutionConfig, config_path,
};
pub use confirmation::{
    ChannelConfirmationHandler, ConfirmFut, ConfirmationHandler, ConfirmationRequest, EditFut,
    ExternalEditor, PendingConfirmation, StaticConfirmation,
};
pub use non_interactive::NonInteractiveExecutor;
pub use policy::{ApprovalMode, SessionAllowList};
pub use record::CompletedToolCall;
pub use scheduler::{
    ScheduledBatch, SchedulerError, SchedulerSettings, ToolCallUpdate, ToolScheduler,
};
pub use telemetry::{
    JsonLinesToolCallLogger, LogError, ToolCallEvent, ToolCallLogger, TracingToolCallLogger,
};
