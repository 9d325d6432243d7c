//! Approval policy: session approval mode and the session allow-list.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anvil_types::{ConfirmationDetails, ConfirmationOutcome};
use serde::{Deserialize, Serialize};

/// How much confirmation the session asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Confirm edit, exec, MCP, and info calls unless allow-listed.
    #[default]
    Default,
    /// File edits run without confirmation.
    AutoEdit,
    /// Nothing is confirmed.
    Yolo,
}

impl ApprovalMode {
    /// Whether the mode alone waives confirmation for `details`.
    #[must_use]
    pub fn skips_confirmation(self, details: &ConfirmationDetails) -> bool {
        match self {
            Self::Default => false,
            Self::AutoEdit => matches!(details, ConfirmationDetails::Edit { .. }),
            Self::Yolo => true,
        }
    }
}

#[derive(Debug, Default)]
struct AllowSets {
    roots: HashSet<String>,
    tools: HashSet<String>,
    servers: HashSet<String>,
}

/// Session-scoped approvals written by `ProceedAlways*` outcomes.
///
/// Entries only ever get added, so a reader racing a writer can at worst
/// prompt once more than necessary.
#[derive(Debug, Default)]
pub struct SessionAllowList {
    sets: RwLock<AllowSets>,
}

impl SessionAllowList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, AllowSets> {
        self.sets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AllowSets> {
        self.sets.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn allow_root(&self, root: impl Into<String>) {
        self.write().roots.insert(root.into());
    }

    /// Allow a tool by name. MCP tools use `server.tool`.
    pub fn allow_tool(&self, tool: impl Into<String>) {
        self.write().tools.insert(tool.into());
    }

    pub fn allow_server(&self, server: impl Into<String>) {
        self.write().servers.insert(server.into());
    }

    /// Whether an existing entry already covers this call.
    #[must_use]
    pub fn permits(&self, tool_name: &str, details: &ConfirmationDetails) -> bool {
        let sets = self.read();
        match details {
            ConfirmationDetails::Exec { .. } => {
                if sets.tools.contains(tool_name) {
                    return true;
                }
                let roots = details.command_roots();
                !roots.is_empty() && roots.iter().all(|root| sets.roots.contains(*root))
            }
            ConfirmationDetails::Edit { .. } => sets.tools.contains(tool_name),
            ConfirmationDetails::McpTool {
                server_name,
                tool_name: mcp_tool,
            } => {
                sets.servers.contains(server_name)
                    || sets.tools.contains(&format!("{server_name}.{mcp_tool}"))
            }
            ConfirmationDetails::Info { .. } => false,
        }
    }

    /// Write the entry an outcome asks for. Returns whether anything was written.
    pub fn record(
        &self,
        outcome: ConfirmationOutcome,
        tool_name: &str,
        details: &ConfirmationDetails,
    ) -> bool {
        use ConfirmationOutcome::{ProceedAlways, ProceedAlwaysServer, ProceedAlwaysTool};

        if !outcome.is_always() {
            return false;
        }
        match (outcome, details) {
            (_, ConfirmationDetails::Info { .. }) => {
                tracing::warn!(tool = tool_name, %outcome, "info confirmations cannot be allow-listed");
                false
            }
            (ProceedAlwaysServer, ConfirmationDetails::McpTool { server_name, .. }) => {
                self.allow_server(server_name.clone());
                true
            }
            (ProceedAlwaysServer, _) => {
                tracing::warn!(tool = tool_name, "proceed_always_server applies only to MCP tools");
                false
            }
            (ProceedAlways, ConfirmationDetails::Exec { .. }) => {
                let roots = details.command_roots();
                if roots.is_empty() {
                    return false;
                }
                let mut sets = self.write();
                for root in roots {
                    sets.roots.insert(root.to_string());
                }
                true
            }
            (
                _,
                ConfirmationDetails::McpTool {
                    server_name,
                    tool_name: mcp_tool,
                },
            ) => {
                self.allow_tool(format!("{server_name}.{mcp_tool}"));
                true
            }
            (ProceedAlways | ProceedAlwaysTool, _) => {
                self.allow_tool(tool_name);
                true
            }
            _ => false,
        }
    }
}
