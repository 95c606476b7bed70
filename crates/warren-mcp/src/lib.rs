/// MCP integration subsystem for the Warren gateway.
///
/// Everything between the catalog and the agent lives here:
/// - **Transport drivers** (`transport_stdio`, `transport_http`): open a
///   channel to one upstream MCP server
/// - **Session layer** (`session`): handshake, id correlation, deadlines,
///   cancellation, ordered teardown
/// - **Toolkit adapter** (`toolkit`): filtered, agent-facing tool views
/// - **Manager** (`manager`): lifecycle orchestration across all servers
/// - **Peer registry** (`peers`): runtime add/remove of HTTP peers
/// - **Testing doubles** (`testing`): scripted transports for exercising
///   the stack without processes or sockets
pub mod manager;
pub mod peers;
pub mod session;
pub mod testing;
pub mod toolkit;
pub mod transport_http;
pub mod transport_stdio;

pub use manager::{DefaultTransportFactory, McpManager};
pub use peers::PeerRegistry;
pub use session::{Session, SessionState, DEFAULT_CALL_TIMEOUT};
pub use toolkit::bind_toolkit;
pub use transport_http::HttpTransport;
pub use transport_stdio::StdioTransport;
