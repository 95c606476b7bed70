/// Shared types, traits, and errors for the Warren MCP gateway.
///
/// This crate is the foundation the other Warren crates depend on. It
/// contains:
/// - **Trait contracts** (`traits`) between transports, sessions, the
///   manager, and the gateway surface
/// - **Wire types** (`rpc`) for JSON-RPC 2.0 / MCP messages
/// - **Tool model** (`tool`): descriptors, outputs, selections
/// - **Server parameters** (`params`) and the **catalog loader** (`catalog`)
/// - **Error types** (`errors`) with a closed kind discriminator
/// - **Agent collaborator types** (`agent`) and **status models** (`status`)
pub mod agent;
pub mod catalog;
pub mod errors;
pub mod params;
pub mod rpc;
pub mod status;
pub mod tool;
pub mod traits;

// Re-export the types nearly every consumer needs at the crate root.
pub use errors::{ErrorKind, GatewayError};
pub use params::{AuthScheme, HttpAuth, ServerParams, TransportKind};
pub use rpc::{JsonRpcError, JsonRpcMessage, ToolSpec};
pub use tool::{ToolDescriptor, ToolOutput, ToolSelection};
pub use traits::{CallableTool, ConversationAgent, McpTransport, Toolkit, TransportFactory};
