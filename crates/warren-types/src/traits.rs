/// Trait contracts between the Warren crates.
///
/// Every cross-crate seam is defined here so the transport drivers, the
/// lifecycle manager, the toolkit adapter, and the gateway surface can be
/// developed and tested against interfaces instead of concrete types.
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent::{ChatReply, ChatRequest};
use crate::errors::GatewayError;
use crate::params::ServerParams;
use crate::rpc::JsonRpcMessage;
use crate::tool::{ToolDescriptor, ToolOutput};

// ============================================================
// Transport
// ============================================================

/// MCP transport abstraction unifying the stdio and streamable-HTTP
/// drivers.
///
/// The session layer uses this trait to exchange JSON-RPC messages with an
/// upstream server regardless of its transport mechanism. Implementations
/// own the underlying OS resource (child process or HTTP connection) and
/// must release it on `close`, even when the peer is already gone.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send one JSON-RPC message to the server.
    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), GatewayError>;

    /// Receive the next JSON-RPC message from the server.
    async fn recv(&mut self) -> Result<JsonRpcMessage, GatewayError>;

    /// Close the transport and release the underlying resource.
    async fn close(&mut self) -> Result<(), GatewayError>;

    /// Whether the transport considers itself connected.
    fn is_connected(&self) -> bool;
}

/// Builds transports from server parameters.
///
/// The manager owns one factory; tests inject a factory that replays canned
/// transcripts instead of spawning processes or opening sockets.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a transport for the given server parameters.
    async fn connect(
        &self,
        params: &ServerParams,
    ) -> Result<Box<dyn McpTransport>, GatewayError>;
}

// ============================================================
// Tools
// ============================================================

/// A callable capability bound into an agent.
///
/// Both stdio- and http-backed tools satisfy this interface through the
/// session layer; the agent needs nothing beyond it. The three descriptor
/// accessors stay valid for the lifetime of the binding even if the
/// underlying session re-enumerates its catalog.
#[async_trait]
pub trait CallableTool: Send + Sync {
    /// Tool name.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> Option<&str>;

    /// JSON Schema fragment for the tool's input.
    fn input_schema(&self) -> &serde_json::Value;

    /// The bind-time descriptor, including the owning server name.
    fn descriptor(&self) -> &ToolDescriptor;

    /// Invoke the tool. Arguments are validated against the schema before
    /// any transport activity; cancellation returns promptly and leaves the
    /// session usable.
    async fn invoke(
        &self,
        args: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, GatewayError>;
}

/// A filtered view of one server's tools, ready to bind into an agent.
///
/// Toolkits are snapshots: mutating or dropping one never affects the
/// session it was built from.
#[derive(Clone)]
pub struct Toolkit {
    /// Server this toolkit draws from.
    pub server: String,
    /// Tools visible under the allow-list filter, in catalog order.
    pub tools: Vec<Arc<dyn CallableTool>>,
}

impl Toolkit {
    /// Tool names exposed by this toolkit.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Look up a tool by exact name.
    pub fn tool(&self, name: &str) -> Option<&Arc<dyn CallableTool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolkit")
            .field("server", &self.server)
            .field("tools", &self.tool_names())
            .finish()
    }
}

// ============================================================
// Agent collaborator
// ============================================================

/// The conversational agent the gateway fronts.
///
/// The gateway resolves toolkits and hands them over; the agent decides
/// which tools to invoke. The gateway never inspects agent internals.
#[async_trait]
pub trait ConversationAgent: Send + Sync {
    /// Run one conversation turn with the given toolkits bound.
    async fn run(
        &self,
        request: ChatRequest,
        toolkits: Vec<Toolkit>,
    ) -> Result<ChatReply, GatewayError>;
}
