//! Core domain types for anvil.
//!
//! This crate contains the pure data model shared by the executor, the tool
//! framework, and the scheduler. Nothing here performs IO or spawns tasks, so
//! every layer (including presentation code outside this workspace) can depend
//! on it.

mod confirmation;
mod sanitize;
mod shell;
mod tool_call;

pub use confirmation::{ConfirmationDetails, ConfirmationOutcome};
pub use sanitize::{TerminalTextFilter, sanitize_terminal_text};
pub use shell::{OutputStream, ShellExecutionResult, ShellOutputEvent};
pub use tool_call::{ToolCallRequest, ToolCallResponse, ToolCallState, ToolErrorType};
