/// Unified error type for the Warren gateway.
///
/// All crates use this error type for propagation across crate boundaries.
/// The set of variants is closed: every failure the gateway can surface maps
/// onto exactly one of these kinds, and the kind is exposed as a first-class
/// discriminator so API layers can translate errors without string matching.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Catalog parsing or peer-registration validation failed. Permanent;
    /// the configuration must be edited.
    #[error("invalid configuration{}: {reason}", fmt_server(.server))]
    InvalidConfig {
        /// Server the entry belongs to, when one is known.
        server: Option<String>,
        /// What was wrong with the configuration.
        reason: String,
    },

    /// Transport could not be established or was dropped.
    #[error("connection to MCP server '{server}' failed: {reason}")]
    Connection { server: String, reason: String },

    /// Connection or handshake exceeded the configured timeout.
    #[error("connection to MCP server '{server}' timed out after {timeout_secs}s")]
    ConnectionTimeout { server: String, timeout_secs: u64 },

    /// Server name unknown to the manager.
    #[error("MCP server '{server}' not found")]
    NotFound { server: String },

    /// Server exists but its session is not ready for calls.
    #[error("MCP server '{server}' is not ready")]
    NotReady { server: String },

    /// Server is present in the catalog but disabled.
    #[error("MCP server '{server}' is disabled")]
    Disabled { server: String },

    /// Tool-call argument validation failed locally, before any transport
    /// activity.
    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArgs { tool: String, reason: String },

    /// The upstream returned an error to a tool call, or the transport died
    /// mid-call.
    #[error("tool '{tool}' on MCP server '{server}' failed: {reason}")]
    ToolExecution {
        server: String,
        tool: String,
        reason: String,
        /// Set when the failure was a per-call deadline expiry.
        deadline_exceeded: bool,
    },

    /// The caller cancelled the in-flight call.
    #[error("tool '{tool}' on MCP server '{server}' was cancelled")]
    Cancelled { server: String, tool: String },
}

fn fmt_server(server: &Option<String>) -> String {
    match server {
        Some(name) => format!(" for MCP server '{name}'"),
        None => String::new(),
    }
}

/// Fieldless discriminator for [`GatewayError`], used by API layers to map
/// errors onto transport-level status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidConfig,
    Connection,
    ConnectionTimeout,
    NotFound,
    NotReady,
    Disabled,
    InvalidArgs,
    ToolExecution,
    Cancelled,
}

impl GatewayError {
    /// The closed error kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            GatewayError::Connection { .. } => ErrorKind::Connection,
            GatewayError::ConnectionTimeout { .. } => ErrorKind::ConnectionTimeout,
            GatewayError::NotFound { .. } => ErrorKind::NotFound,
            GatewayError::NotReady { .. } => ErrorKind::NotReady,
            GatewayError::Disabled { .. } => ErrorKind::Disabled,
            GatewayError::InvalidArgs { .. } => ErrorKind::InvalidArgs,
            GatewayError::ToolExecution { .. } => ErrorKind::ToolExecution,
            GatewayError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// The server name carried by this error, when one exists.
    pub fn server(&self) -> Option<&str> {
        match self {
            GatewayError::InvalidConfig { server, .. } => server.as_deref(),
            GatewayError::Connection { server, .. }
            | GatewayError::ConnectionTimeout { server, .. }
            | GatewayError::NotFound { server }
            | GatewayError::NotReady { server }
            | GatewayError::Disabled { server }
            | GatewayError::ToolExecution { server, .. }
            | GatewayError::Cancelled { server, .. } => Some(server),
            GatewayError::InvalidArgs { .. } => None,
        }
    }

    /// Shorthand for an [`GatewayError::InvalidConfig`] without a server.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        GatewayError::InvalidConfig {
            server: None,
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`GatewayError::InvalidConfig`] scoped to a server.
    pub fn invalid_server_config(server: impl Into<String>, reason: impl Into<String>) -> Self {
        GatewayError::InvalidConfig {
            server: Some(server.into()),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`GatewayError::Connection`].
    pub fn connection(server: impl Into<String>, reason: impl Into<String>) -> Self {
        GatewayError::Connection {
            server: server.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`GatewayError::ToolExecution`] that did not hit a
    /// deadline.
    pub fn tool_execution(
        server: impl Into<String>,
        tool: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        GatewayError::ToolExecution {
            server: server.into(),
            tool: tool.into(),
            reason: reason.into(),
            deadline_exceeded: false,
        }
    }
}
