//! REST management surface over the manager and peer registry.
//!
//! Thin handlers: every route is a direct delegation to the manager with
//! the gateway's error kinds mapped onto HTTP status codes. Each response
//! carries an `x-trace-id` header so failures can be chased through the
//! logs.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use warren_mcp::{McpManager, PeerRegistry};
use warren_types::errors::{ErrorKind, GatewayError};
use warren_types::status::{
    PeerStatus, ReloadAllOutcome, ReloadOutcome, ServerStatusInfo,
};

/// Shared state behind the management routes.
pub struct RestState {
    manager: Arc<McpManager>,
    peers: PeerRegistry,
}

/// Build the management router.
pub fn router(manager: Arc<McpManager>) -> Router {
    let state = Arc::new(RestState {
        peers: PeerRegistry::new(Arc::clone(&manager)),
        manager,
    });
    Router::new()
        .route("/mcp/servers", get(list_servers))
        .route("/mcp/servers/reload", post(reload_all))
        .route("/mcp/servers/:name/reload", post(reload_one))
        .route("/mcp/peers", get(list_peers).post(add_peer))
        .route("/mcp/peers/:name", delete(remove_peer))
        .layer(middleware::from_fn(attach_trace_id))
        .with_state(state)
}

/// Map an error kind onto the HTTP status the management API serves.
pub fn http_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidConfig | ErrorKind::InvalidArgs => StatusCode::BAD_REQUEST,
        ErrorKind::NotReady | ErrorKind::Disabled => StatusCode::CONFLICT,
        ErrorKind::ConnectionTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Connection | ErrorKind::ToolExecution => StatusCode::BAD_GATEWAY,
        ErrorKind::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error wrapper turning [`GatewayError`] into a structured HTTP response.
pub struct ApiError(pub GatewayError);

#[derive(Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = http_status(self.0.kind());
        let body = ErrorBody {
            kind: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(serde_json::json!({ "error": body }))).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

/// Give every response a trace id.
async fn attach_trace_id(request: Request<axum::body::Body>, next: Next) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    let mut response = next.run(request).await;
    if let Ok(value) = trace_id.parse() {
        response.headers_mut().insert("x-trace-id", value);
    }
    response
}

#[derive(Serialize)]
struct ListServersResponse {
    initialized: bool,
    servers: Vec<ServerStatusInfo>,
}

async fn list_servers(State(state): State<Arc<RestState>>) -> Json<ListServersResponse> {
    Json(ListServersResponse {
        initialized: state.manager.is_initialized(),
        servers: state.manager.list_servers(),
    })
}

async fn reload_all(State(state): State<Arc<RestState>>) -> Json<ReloadAllOutcome> {
    info!("REST request to reload all MCP servers");
    Json(state.manager.reload_all().await)
}

async fn reload_one(
    State(state): State<Arc<RestState>>,
    Path(name): Path<String>,
) -> Result<Json<ReloadOutcome>, ApiError> {
    info!(server = %name, "REST request to reload MCP server");
    Ok(Json(state.manager.reload(&name).await?))
}

async fn list_peers(State(state): State<Arc<RestState>>) -> Json<Vec<PeerStatus>> {
    Json(state.peers.list())
}

#[derive(Debug, Deserialize)]
struct AddPeerRequest {
    name: String,
    url: String,
    #[serde(default)]
    auth_token: Option<String>,
}

async fn add_peer(
    State(state): State<Arc<RestState>>,
    Json(request): Json<AddPeerRequest>,
) -> Result<(StatusCode, Json<PeerStatus>), ApiError> {
    info!(peer = %request.name, "REST request to add MCP peer");
    let status = state
        .peers
        .add(&request.name, &request.url, request.auth_token)
        .await?;
    Ok((StatusCode::CREATED, Json(status)))
}

#[derive(Serialize)]
struct RemovePeerResponse {
    removed: String,
}

async fn remove_peer(
    State(state): State<Arc<RestState>>,
    Path(name): Path<String>,
) -> Result<Json<RemovePeerResponse>, ApiError> {
    info!(peer = %name, "REST request to remove MCP peer");
    state.peers.remove(&name).await?;
    Ok(Json(RemovePeerResponse { removed: name }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use warren_mcp::testing::{ScriptedFactory, ScriptedTransport};
    use warren_types::params::ServerParams;
    use warren_types::rpc::{JsonRpcMessage, MCP_PROTOCOL_VERSION};

    fn boot_script(names: &[&str]) -> ScriptedTransport {
        let tools: Vec<_> = names
            .iter()
            .map(|n| json!({"name": n, "inputSchema": {"type": "object"}}))
            .collect();
        ScriptedTransport::new(vec![
            JsonRpcMessage::response(
                Some(json!(1)),
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "serverInfo": {"name": "stub", "version": "0"},
                }),
            ),
            JsonRpcMessage::response(Some(json!(2)), json!({ "tools": tools })),
        ])
    }

    async fn serve(manager: Arc<McpManager>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(manager)).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn booted_manager() -> Arc<McpManager> {
        let factory = ScriptedFactory::new();
        factory.script("fs", boot_script(&["read_file"]));
        let manager = Arc::new(McpManager::new(Arc::new(factory)).with_default_timeout(5));
        manager
            .initialize(vec![ServerParams::stdio("fs", "cmd").with_timeout_secs(5)])
            .await
            .unwrap();
        manager
    }

    #[tokio::test]
    async fn list_servers_reports_catalog_state() {
        let manager = booted_manager().await;
        let base = serve(manager).await;

        let resp = reqwest::get(format!("{base}/mcp/servers")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert!(resp.headers().contains_key("x-trace-id"));

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["initialized"], json!(true));
        assert_eq!(body["servers"][0]["name"], json!("fs"));
        assert_eq!(body["servers"][0]["connected"], json!(true));
        assert_eq!(body["servers"][0]["functions"], json!(["read_file"]));
    }

    #[tokio::test]
    async fn reload_of_unknown_server_is_404_with_kind() {
        let manager = booted_manager().await;
        let base = serve(manager).await;

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{base}/mcp/servers/ghost/reload"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        assert!(resp.headers().contains_key("x-trace-id"));

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["kind"], json!("not_found"));
        assert!(body["error"]["message"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn add_peer_with_bad_url_is_400() {
        let manager = booted_manager().await;
        let base = serve(manager).await;

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{base}/mcp/peers"))
            .json(&json!({"name": "b", "url": "not-a-url"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["kind"], json!("invalid_config"));
    }

    #[tokio::test]
    async fn peer_lifecycle_over_rest() {
        let factory = ScriptedFactory::new();
        factory.script("fs", boot_script(&["read_file"]));
        factory.script("b", boot_script(&["chat", "status"]));
        let manager = Arc::new(McpManager::new(Arc::new(factory)).with_default_timeout(5));
        manager
            .initialize(vec![ServerParams::stdio("fs", "cmd").with_timeout_secs(5)])
            .await
            .unwrap();
        let base = serve(Arc::clone(&manager)).await;
        let client = reqwest::Client::new();

        // Add.
        let resp = client
            .post(format!("{base}/mcp/peers"))
            .json(&json!({"name": "b", "url": "http://b.example/mcp", "auth_token": "tok"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["function_count"], json!(2));

        // Listed.
        let peers: Value = client
            .get(format!("{base}/mcp/peers"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(peers.as_array().unwrap().len(), 1);

        // Name collision maps to 400.
        let resp = client
            .post(format!("{base}/mcp/peers"))
            .json(&json!({"name": "fs", "url": "http://x.example/mcp"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        // Remove; the peer disappears from the server list.
        let resp = client
            .delete(format!("{base}/mcp/peers/b"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert!(!manager.list_servers().iter().any(|s| s.name == "b"));

        // Removing it again is 404.
        let resp = client
            .delete(format!("{base}/mcp/peers/b"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[test]
    fn status_mapping_covers_every_kind() {
        assert_eq!(http_status(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(http_status(ErrorKind::InvalidConfig), StatusCode::BAD_REQUEST);
        assert_eq!(http_status(ErrorKind::InvalidArgs), StatusCode::BAD_REQUEST);
        assert_eq!(http_status(ErrorKind::NotReady), StatusCode::CONFLICT);
        assert_eq!(http_status(ErrorKind::Disabled), StatusCode::CONFLICT);
        assert_eq!(
            http_status(ErrorKind::ConnectionTimeout),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(http_status(ErrorKind::Connection), StatusCode::BAD_GATEWAY);
        assert_eq!(
            http_status(ErrorKind::ToolExecution),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            http_status(ErrorKind::Cancelled),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
