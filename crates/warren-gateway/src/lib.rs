/// Gateway surfaces for Warren.
///
/// Two axum routers over the MCP subsystem:
/// - **`reexport`**: the MCP server this gateway publishes at `/mcp`, so
///   other gateways can register it as a peer and drive its agent
/// - **`rest`**: the management API (list servers, reload, peers) with the
///   gateway error kinds mapped onto HTTP status codes
pub mod reexport;
pub mod rest;

pub use reexport::{McpEndpoint, AUTH_TOKEN_ENV, MOUNT_PATH};
pub use rest::{http_status, router as rest_router, ApiError};
