//! The gateway's own MCP server endpoint.
//!
//! Published at `/mcp` and guarded by a single bearer token, this endpoint
//! re-exports the local agent and the manager's administrative surface as a
//! fixed MCP tool set, so another gateway can register this one as a peer.
//!
//! Responses use the same wire shape the warren HTTP transport consumes: a
//! single-event SSE body carrying one JSON-RPC message, plus an
//! `Mcp-Session-Id` header. That symmetry is what makes gateway-to-gateway
//! federation (and recursion through `chat`) work with no special cases.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use warren_mcp::McpManager;
use warren_types::agent::{ChatRequest, PEER_CALLER};
use warren_types::errors::GatewayError;
use warren_types::rpc::{error_codes, JsonRpcMessage, ToolSpec, MCP_PROTOCOL_VERSION};
use warren_types::traits::ConversationAgent;

/// Environment variable holding the required bearer token.
pub const AUTH_TOKEN_ENV: &str = "MCP_SERVER_AUTH_TOKEN";

/// Mount path of the re-exported MCP server.
pub const MOUNT_PATH: &str = "/mcp";

/// The re-exported MCP server: fixed tool set backed by the manager and the
/// local agent.
///
/// Holds the manager by identity only and resolves toolkits by name on each
/// `chat` call, so there is no strong reference cycle between the endpoint
/// and the toolkits it hands to the agent.
pub struct McpEndpoint {
    manager: Arc<McpManager>,
    agent: Arc<dyn ConversationAgent>,
    auth_token: String,
    session_id: String,
}

impl std::fmt::Debug for McpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpEndpoint")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl McpEndpoint {
    /// Build an endpoint with an explicit token.
    ///
    /// An empty token is a fatal configuration error: the endpoint refuses
    /// to exist unauthenticated.
    pub fn new(
        manager: Arc<McpManager>,
        agent: Arc<dyn ConversationAgent>,
        auth_token: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let auth_token = auth_token.into();
        if auth_token.trim().is_empty() {
            return Err(GatewayError::invalid_config(
                "MCP server auth token must not be empty",
            ));
        }
        let token_prefix: String = auth_token.chars().take(4).collect();
        info!(%token_prefix, "MCP endpoint configured with bearer authentication");
        Ok(Self {
            manager,
            agent,
            auth_token,
            session_id: Uuid::new_v4().to_string(),
        })
    }

    /// Build an endpoint from the `MCP_SERVER_AUTH_TOKEN` environment
    /// variable. Absence is fatal.
    pub fn from_env(
        manager: Arc<McpManager>,
        agent: Arc<dyn ConversationAgent>,
    ) -> Result<Self, GatewayError> {
        let token = std::env::var(AUTH_TOKEN_ENV).map_err(|_| {
            GatewayError::invalid_config(format!(
                "{AUTH_TOKEN_ENV} is required for MCP server authentication"
            ))
        })?;
        Self::new(manager, agent, token)
    }

    /// An axum router serving this endpoint at [`MOUNT_PATH`].
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route(MOUNT_PATH, post(handle_rpc))
            .with_state(self)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some(&format!("Bearer {}", self.auth_token))
    }
}

async fn handle_rpc(
    State(endpoint): State<Arc<McpEndpoint>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Authentication happens before anything else; a rejected request never
    // reaches the manager.
    if !endpoint.authorized(&headers) {
        warn!("rejected MCP request with missing or mismatched bearer");
        let error = JsonRpcMessage::error_response(
            None,
            error_codes::UNAUTHORIZED,
            "missing or invalid bearer token",
        );
        return json_rpc_over_http(StatusCode::UNAUTHORIZED, &error);
    }

    let message: JsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(msg) => msg,
        Err(e) => {
            let error = JsonRpcMessage::error_response(
                None,
                error_codes::PARSE_ERROR,
                &format!("body is not a JSON-RPC message: {e}"),
            );
            return json_rpc_over_http(StatusCode::BAD_REQUEST, &error);
        }
    };

    if message.is_notification() {
        return StatusCode::ACCEPTED.into_response();
    }

    let id = message.id.clone();
    let reply = match message.method.as_deref() {
        Some("initialize") => JsonRpcMessage::response(
            id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "warren-gateway",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        Some("ping") => JsonRpcMessage::response(id, json!({})),
        Some("tools/list") => {
            JsonRpcMessage::response(id, json!({ "tools": exported_tools() }))
        }
        Some("tools/call") => {
            let params = message.params.unwrap_or(serde_json::Value::Null);
            let tool = params
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string();
            let args = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            info!(tool = %tool, "MCP tool called on the gateway endpoint");
            match dispatch_tool(&endpoint, &tool, args).await {
                Ok(result) => JsonRpcMessage::response(id, tool_result(&result)),
                Err(error) => {
                    let code = match error.kind() {
                        warren_types::ErrorKind::InvalidArgs => error_codes::INVALID_PARAMS,
                        _ => error_codes::INTERNAL_ERROR,
                    };
                    JsonRpcMessage::error_response(id, code, &error.to_string())
                }
            }
        }
        Some(other) => JsonRpcMessage::error_response(
            id,
            error_codes::METHOD_NOT_FOUND,
            &format!("unknown method '{other}'"),
        ),
        None => JsonRpcMessage::error_response(
            id,
            error_codes::INVALID_REQUEST,
            "request carries no method",
        ),
    };

    sse_reply(&endpoint.session_id, &reply)
}

/// Wrap a tool's JSON payload in the MCP result shape: one text content
/// block plus the structured value.
fn tool_result(value: &serde_json::Value) -> serde_json::Value {
    json!({
        "content": [{
            "type": "text",
            "text": value.to_string(),
        }],
        "structuredContent": value,
        "isError": false,
    })
}

/// The fixed tool set this gateway re-exports.
fn exported_tools() -> Vec<ToolSpec> {
    let name_arg = json!({
        "type": "object",
        "properties": {
            "server_name": { "type": "string", "description": "Name of the MCP server" }
        },
        "required": ["server_name"],
    });

    vec![
        ToolSpec {
            name: "list_mcp_servers".to_string(),
            description: Some(
                "List all configured MCP servers and their status".to_string(),
            ),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolSpec {
            name: "get_mcp_server_functions".to_string(),
            description: Some(
                "Get the function names exposed by a specific MCP server".to_string(),
            ),
            input_schema: name_arg.clone(),
        },
        ToolSpec {
            name: "reload_mcp_server".to_string(),
            description: Some("Reload a specific MCP server by name".to_string()),
            input_schema: name_arg,
        },
        ToolSpec {
            name: "reload_all_mcp_servers".to_string(),
            description: Some("Reload all enabled MCP servers".to_string()),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolSpec {
            name: "get_available_mcp_servers".to_string(),
            description: Some("Names of all connected MCP servers".to_string()),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolSpec {
            name: "chat".to_string(),
            description: Some(
                "Run a natural-language conversation through this gateway's agent, \
                 with access to all of its MCP tools"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "Natural language instruction"
                    },
                    "model_key": {
                        "type": "string",
                        "description": "Optional model to use"
                    },
                    "conversation_id": {
                        "type": "string",
                        "description": "Optional conversation id for multi-turn tracking"
                    }
                },
                "required": ["message"],
            }),
        },
    ]
}

async fn dispatch_tool(
    endpoint: &McpEndpoint,
    tool: &str,
    args: serde_json::Value,
) -> Result<serde_json::Value, GatewayError> {
    match tool {
        "list_mcp_servers" => Ok(serde_json::to_value(endpoint.manager.system_status())
            .unwrap_or(serde_json::Value::Null)),
        "get_mcp_server_functions" => {
            let server = require_server_name(&args, tool)?;
            Ok(json!(endpoint.manager.server_functions(&server)))
        }
        "reload_mcp_server" => {
            let server = require_server_name(&args, tool)?;
            // Tool callers get a structured outcome rather than a raised
            // error they cannot interpret.
            let outcome = match endpoint.manager.reload(&server).await {
                Ok(outcome) => outcome,
                Err(e) => warren_types::status::ReloadOutcome {
                    server,
                    success: false,
                    message: e.to_string(),
                    function_count: 0,
                },
            };
            Ok(serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null))
        }
        "reload_all_mcp_servers" => {
            let outcome = endpoint.manager.reload_all().await;
            Ok(serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null))
        }
        "get_available_mcp_servers" => Ok(json!(endpoint.manager.available_servers())),
        "chat" => run_chat(endpoint, args).await,
        other => Err(GatewayError::InvalidArgs {
            tool: other.to_string(),
            reason: "no such tool on this gateway".to_string(),
        }),
    }
}

fn require_server_name(args: &serde_json::Value, tool: &str) -> Result<String, GatewayError> {
    args.get("server_name")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| GatewayError::InvalidArgs {
            tool: tool.to_string(),
            reason: "missing required field 'server_name'".to_string(),
        })
}

/// Run one agent turn on behalf of a peer.
///
/// Toolkits are resolved from the manager by name at call time, so the
/// agent may itself call tools on servers that include other gateways;
/// recursion ends wherever a peer has no further peers.
async fn run_chat(
    endpoint: &McpEndpoint,
    args: serde_json::Value,
) -> Result<serde_json::Value, GatewayError> {
    let message = args
        .get("message")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::InvalidArgs {
            tool: "chat".to_string(),
            reason: "missing required field 'message'".to_string(),
        })?;

    let request = ChatRequest {
        message: message.to_string(),
        model_key: args
            .get("model_key")
            .and_then(|v| v.as_str())
            .map(String::from),
        conversation_id: args
            .get("conversation_id")
            .and_then(|v| v.as_str())
            .map(String::from),
        caller: PEER_CALLER.to_string(),
    };
    let model = request.model_key.clone().unwrap_or_default();
    let conversation_id = request.conversation_id_or_new();

    let toolkits = endpoint.manager.ready_toolkits();
    info!(
        caller = %request.caller,
        toolkit_count = toolkits.len(),
        "running peer chat through the local agent"
    );

    match endpoint.agent.run(request, toolkits).await {
        Ok(reply) => Ok(json!({
            "success": true,
            "content": reply.content,
            "model": reply.model,
            "conversation_id": reply.conversation_id,
            "message_id": reply.message_id,
            "error": null,
        })),
        Err(e) => Ok(json!({
            "success": false,
            "content": "",
            "model": model,
            "conversation_id": conversation_id,
            "message_id": null,
            "error": e.to_string(),
        })),
    }
}

/// One JSON-RPC message as a single-event SSE response.
fn sse_reply(session_id: &str, message: &JsonRpcMessage) -> Response {
    let data = serde_json::to_string(message).unwrap_or_default();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header("Mcp-Session-Id", session_id)
        .body(axum::body::Body::from(format!("data: {data}\n\n")))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// A JSON-RPC error as a plain JSON body with the given HTTP status.
fn json_rpc_over_http(status: StatusCode, message: &JsonRpcMessage) -> Response {
    let data = serde_json::to_string(message).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(data))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
