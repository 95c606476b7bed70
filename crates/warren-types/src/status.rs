/// Read-model types served by the management surfaces.
///
/// These are snapshots of manager state; none of them hold live session
/// references.
use serde::{Deserialize, Serialize};

/// One server's status row, as reported by `list_servers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatusInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Present in the catalog and marked enabled.
    pub enabled: bool,
    /// Session is Ready.
    pub connected: bool,
    pub function_count: usize,
    /// Tool names currently exposed, in catalog order.
    pub functions: Vec<String>,
    /// Last initialization or transport error, when the session failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Aggregate snapshot of the whole MCP subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    /// At least one server reached Ready since startup.
    pub initialized: bool,
    pub servers: Vec<ServerStatusInfo>,
    pub total_servers: usize,
    pub total_functions: usize,
    /// Names of servers whose session is Ready.
    pub available_servers: Vec<String>,
}

/// Summary of one `initialize` run, emitted to the log and returned to the
/// caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitSummary {
    /// Servers that reached Ready.
    pub ready: usize,
    /// Servers that ended Failed.
    pub failed: usize,
    /// Enabled servers attempted.
    pub attempted: usize,
    /// Functions available across all Ready servers.
    pub total_functions: usize,
}

/// Outcome of reloading one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadOutcome {
    pub server: String,
    pub success: bool,
    pub message: String,
    pub function_count: usize,
}

/// Outcome of reloading every enabled server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadAllOutcome {
    /// True when at least one server reloaded successfully.
    pub success: bool,
    pub reloaded: usize,
    pub failed: usize,
    pub results: Vec<ReloadOutcome>,
}

/// Status returned when a peer is registered at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStatus {
    pub name: String,
    pub connected: bool,
    pub function_count: usize,
}
