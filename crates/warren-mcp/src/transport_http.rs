//! MCP streamable-HTTP transport.
//!
//! HTTP client for remote MCP servers:
//! - JSON-RPC requests as HTTP POST bodies
//! - responses either as a single JSON document or as an SSE event stream
//! - session continuity via the `Mcp-Session-Id` header
//! - resumption support via `Last-Event-ID`
//!
//! The transport owns one persistent `reqwest::Client` for its entire
//! lifetime. There is no scoped acquire/release block: the session that owns
//! this transport decides when `close` happens, so tool calls across
//! conversation turns reuse the same connection pool.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use warren_types::errors::GatewayError;
use warren_types::params::ServerParams;
use warren_types::rpc::JsonRpcMessage;
use warren_types::traits::McpTransport;

/// Streamable-HTTP transport for one remote MCP server.
pub struct HttpTransport {
    server: String,
    endpoint: String,
    timeout_secs: u64,
    /// Pre-built `(name, value)` auth header, if the params carry one.
    auth_header: Option<(String, String)>,
    client: reqwest::Client,
    /// `Mcp-Session-Id` returned by the server, replayed on every request.
    session_id: Option<String>,
    /// Last SSE event id seen, replayed as `Last-Event-ID`.
    last_event_id: Option<String>,
    /// Messages decoded from responses, not yet consumed by `recv`.
    pending: VecDeque<JsonRpcMessage>,
    connected: bool,
}

impl HttpTransport {
    /// Build a transport from HTTP server params.
    pub fn new(params: &ServerParams) -> Result<Self, GatewayError> {
        let endpoint = params
            .url
            .clone()
            .ok_or_else(|| {
                GatewayError::invalid_server_config(&params.name, "http transport requires a url")
            })?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(params.timeout_secs))
            .build()
            .map_err(|e| {
                GatewayError::connection(&params.name, format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            server: params.name.clone(),
            endpoint,
            timeout_secs: params.timeout_secs,
            auth_header: params.auth.as_ref().map(|a| a.header()),
            client,
            session_id: None,
            last_event_id: None,
            pending: VecDeque::new(),
            connected: true,
        })
    }

    /// The session id negotiated with the server, once known.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(
                reqwest::header::ACCEPT,
                "application/json, text/event-stream",
            );
        if let Some((name, value)) = &self.auth_header {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(session_id) = &self.session_id {
            builder = builder.header("Mcp-Session-Id", session_id.as_str());
        }
        if let Some(last_id) = &self.last_event_id {
            builder = builder.header("Last-Event-ID", last_id.as_str());
        }
        builder
    }

    fn map_request_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::ConnectionTimeout {
                server: self.server.clone(),
                timeout_secs: self.timeout_secs,
            }
        } else if e.is_connect() {
            GatewayError::connection(&self.server, format!("cannot reach {}: {e}", self.endpoint))
        } else {
            GatewayError::connection(&self.server, format!("HTTP request failed: {e}"))
        }
    }

    fn buffer_response(&mut self, content_type: &str, body: &str) {
        if body.is_empty() {
            // Notification acknowledgements come back as empty 2xx bodies.
            return;
        }

        if content_type.contains("text/event-stream") {
            for event in parse_sse(body) {
                if let Some(id) = event.id {
                    self.last_event_id = Some(id);
                }
                // The default SSE event type is "message"; anything else is
                // not a JSON-RPC payload.
                if !matches!(event.event.as_deref(), None | Some("message")) {
                    continue;
                }
                let Some(data) = event.data else { continue };
                match serde_json::from_str::<JsonRpcMessage>(&data) {
                    Ok(msg) => self.pending.push_back(msg),
                    Err(e) => {
                        warn!(
                            server = %self.server,
                            error = %e,
                            "discarding SSE event that is not a JSON-RPC message"
                        );
                    }
                }
            }
        } else {
            match serde_json::from_str::<JsonRpcMessage>(body) {
                Ok(msg) => self.pending.push_back(msg),
                Err(e) => {
                    warn!(
                        server = %self.server,
                        error = %e,
                        "discarding response body that is not a JSON-RPC message"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), GatewayError> {
        if !self.connected {
            return Err(GatewayError::connection(&self.server, "transport is closed"));
        }

        debug!(
            server = %self.server,
            method = ?message.method,
            id = ?message.id,
            "POSTing JSON-RPC message"
        );

        let response = self
            .request()
            .json(&message)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if let Some(session_id) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            if self.session_id.as_deref() != Some(session_id) {
                debug!(server = %self.server, session_id, "captured MCP session id");
                self.session_id = Some(session_id.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::connection(
                &self.server,
                format!("server returned HTTP {status}"),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response.text().await.map_err(|e| {
            GatewayError::connection(&self.server, format!("failed to read response body: {e}"))
        })?;

        self.buffer_response(&content_type, &body);
        Ok(())
    }

    async fn recv(&mut self) -> Result<JsonRpcMessage, GatewayError> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(msg);
        }
        Err(GatewayError::connection(
            &self.server,
            if self.connected {
                "no buffered response; the server returned nothing for the last request"
            } else {
                "transport is closed"
            },
        ))
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        // Best-effort cancellation sentinel; the peer may already be gone.
        let sentinel = JsonRpcMessage::notification("notifications/cancelled", None);
        if let Err(e) = self.request().json(&sentinel).send().await {
            debug!(server = %self.server, error = %e, "cancellation sentinel not delivered");
        }

        self.pending.clear();
        debug!(server = %self.server, "streamable-HTTP transport closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================
// SSE parsing
// ============================================================

/// One parsed `text/event-stream` event.
#[derive(Debug, Default, PartialEq)]
struct SseEvent {
    id: Option<String>,
    event: Option<String>,
    data: Option<String>,
}

/// Parse an SSE body into events with a line-state machine.
///
/// Fields accumulate until a blank line terminates the event; multiple
/// `data:` lines join with newlines; comment lines (leading `:`) and
/// unknown fields are ignored. Events without data are dropped.
fn parse_sse(body: &str) -> Vec<SseEvent> {
    let mut events = Vec::new();
    let mut current = SseEvent::default();

    let mut flush = |current: &mut SseEvent| {
        if current.data.is_some() {
            events.push(std::mem::take(current));
        } else {
            *current = SseEvent::default();
        }
    };

    for line in body.lines() {
        if line.is_empty() {
            flush(&mut current);
            continue;
        }
        if line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.find(':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "id" => current.id = Some(value.to_string()),
            "event" => current.event = Some(value.to_string()),
            "data" => match &mut current.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => current.data = Some(value.to_string()),
            },
            _ => {}
        }
    }
    flush(&mut current);

    events
}
