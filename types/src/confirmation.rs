use std::fmt;

use serde::{Deserialize, Serialize};

/// Data a confirming party needs to render a decision prompt.
///
/// Never carries executable state: resolving a confirmation only ever
/// yields a [`ConfirmationOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfirmationDetails {
    /// A file modification, rendered as a unified diff.
    Edit { file_name: String, diff: String },
    /// A shell command. `root_command` is the comma-separated list of the
    /// command roots (`git, npm`) used for session allow-listing.
    Exec {
        root_command: String,
        full_command: String,
    },
    /// A read-style action that still needs consent (e.g. fetching URLs).
    Info {
        prompt: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        urls: Vec<String>,
    },
    /// A tool provided by an MCP server.
    McpTool {
        server_name: String,
        tool_name: String,
    },
}

impl ConfirmationDetails {
    /// Build `Exec` details from the individual command roots.
    pub fn exec(roots: &[String], full_command: impl Into<String>) -> Self {
        Self::Exec {
            root_command: roots.join(", "),
            full_command: full_command.into(),
        }
    }

    /// The individual command roots of `Exec` details; empty otherwise.
    #[must_use]
    pub fn command_roots(&self) -> Vec<&str> {
        match self {
            Self::Exec { root_command, .. } => root_command
                .split(',')
                .map(str::trim)
                .filter(|root| !root.is_empty())
                .collect(),
            Self::Edit { .. } | Self::Info { .. } | Self::McpTool { .. } => Vec::new(),
        }
    }

    /// One-line summary suitable for a prompt title or log field.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Edit { file_name, .. } => format!("Edit {file_name}"),
            Self::Exec { full_command, .. } => format!("Run: {full_command}"),
            Self::Info { prompt, .. } => prompt.clone(),
            Self::McpTool {
                server_name,
                tool_name,
            } => format!("Call {tool_name} on MCP server {server_name}"),
        }
    }
}

/// Decision returned by the confirmation collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    /// Execute this call only.
    ProceedOnce,
    /// Execute and allow the same command roots (or tool) for the session.
    ProceedAlways,
    /// Execute and allow the same tool for the session.
    ProceedAlwaysTool,
    /// Execute and allow every tool of the same MCP server for the session.
    ProceedAlwaysServer,
    /// Let an external editor revise the call's content first.
    ModifyExternally,
    /// Do not execute.
    Cancel,
}

impl ConfirmationOutcome {
    /// Whether this outcome lets the call run.
    #[must_use]
    pub fn proceeds(self) -> bool {
        matches!(
            self,
            Self::ProceedOnce
                | Self::ProceedAlways
                | Self::ProceedAlwaysTool
                | Self::ProceedAlwaysServer
        )
    }

    /// Whether this outcome asks for a session allow-list entry.
    #[must_use]
    pub fn is_always(self) -> bool {
        matches!(
            self,
            Self::ProceedAlways | Self::ProceedAlwaysTool | Self::ProceedAlwaysServer
        )
    }
}

impl fmt::Display for ConfirmationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ProceedOnce => "proceed_once",
            Self::ProceedAlways => "proceed_always",
            Self::ProceedAlwaysTool => "proceed_always_tool",
            Self::ProceedAlwaysServer => "proceed_always_server",
            Self::ModifyExternally => "modify_externally",
            Self::Cancel => "cancel",
        };
        f.write_str(label)
    }
}
