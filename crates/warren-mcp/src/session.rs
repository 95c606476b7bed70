//! Session layer on top of the MCP transports.
//!
//! A [`Session`] owns exactly one transport for its whole lifetime and runs
//! the MCP handshake, id-correlated request/response exchange, per-call
//! deadlines, and cancellation. All calls on the same session are serialized
//! through one mutex around the transport, which is what guarantees that
//! replies arrive in submission order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock as StdRwLock;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warren_types::errors::GatewayError;
use warren_types::rpc::{JsonRpcMessage, ToolSpec, MCP_PROTOCOL_VERSION};
use warren_types::tool::{ToolDescriptor, ToolOutput};
use warren_types::traits::McpTransport;

/// Default per-call deadline applied when the caller supplies none.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on the close grace period.
const CLOSE_GRACE_CAP: Duration = Duration::from_secs(5);

/// Messages skipped while hunting for a correlated reply before the session
/// declares the upstream misbehaved.
const MAX_SKIPPED_MESSAGES: usize = 64;

/// Lifecycle states of a server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Catalog entry known, nothing started yet.
    Pending,
    /// Handshake in flight.
    Initializing,
    /// Tool calls flowing.
    Ready,
    /// Handshake or transport failure; `last_error` is populated.
    Failed,
    /// Close requested; outstanding calls draining, new calls rejected.
    Closing,
    /// Transport released.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SessionState::Pending => "pending",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(text)
    }
}

/// A live, initialized channel to one upstream MCP server.
///
/// The session exclusively owns its transport handle; the handle is released
/// on the transition to `Closed`, even when the session previously failed.
pub struct Session {
    server: String,
    timeout_secs: u64,
    state: StdRwLock<SessionState>,
    last_error: StdRwLock<Option<String>>,
    io: Mutex<Box<dyn McpTransport>>,
    next_id: AtomicU64,
    tools: StdRwLock<Vec<ToolDescriptor>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Run the MCP handshake over `transport` and return a Ready session.
    ///
    /// The whole sequence (`initialize`, the `initialized` notification,
    /// and the first `tools/list`) is bounded by `timeout_secs`. On any
    /// failure the transport is closed best-effort and the error carries
    /// the server name.
    pub async fn handshake(
        server: &str,
        timeout_secs: u64,
        transport: Box<dyn McpTransport>,
    ) -> Result<Self, GatewayError> {
        let session = Self {
            server: server.to_string(),
            timeout_secs,
            state: StdRwLock::new(SessionState::Initializing),
            last_error: StdRwLock::new(None),
            io: Mutex::new(transport),
            next_id: AtomicU64::new(0),
            tools: StdRwLock::new(Vec::new()),
        };

        let deadline = Duration::from_secs(timeout_secs);
        let outcome = tokio::time::timeout(deadline, session.run_handshake()).await;

        match outcome {
            Ok(Ok(tools)) => {
                info!(
                    server = %server,
                    tool_count = tools.len(),
                    "MCP session is ready"
                );
                *session.tools.write().unwrap_or_else(|p| p.into_inner()) = tools;
                session.set_state(SessionState::Ready);
                Ok(session)
            }
            Ok(Err(err)) => {
                session.record_failure(err.to_string());
                session.release_transport().await;
                Err(err)
            }
            Err(_) => {
                let err = GatewayError::ConnectionTimeout {
                    server: server.to_string(),
                    timeout_secs,
                };
                session.record_failure(err.to_string());
                session.release_transport().await;
                Err(err)
            }
        }
    }

    async fn run_handshake(&self) -> Result<Vec<ToolDescriptor>, GatewayError> {
        let mut io = self.io.lock().await;

        let init_id = self.allocate_id();
        io.send(JsonRpcMessage::request(
            init_id,
            "initialize",
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "clientInfo": {
                    "name": "warren",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ))
        .await?;

        let reply = recv_correlated(&mut *io, &self.server, init_id).await?;
        if let Some(error) = reply.error {
            return Err(GatewayError::connection(
                &self.server,
                format!("server rejected initialize: {} (code {})", error.message, error.code),
            ));
        }

        io.send(JsonRpcMessage::notification(
            "notifications/initialized",
            None,
        ))
        .await?;

        let list_id = self.allocate_id();
        io.send(JsonRpcMessage::request(list_id, "tools/list", json!({})))
            .await?;
        let reply = recv_correlated(&mut *io, &self.server, list_id).await?;

        parse_tools_reply(&self.server, reply)
    }

    /// Server this session talks to.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Last recorded failure, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Snapshot of the cached tool catalog.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write().unwrap_or_else(|p| p.into_inner()) = state;
    }

    fn record_failure(&self, reason: String) {
        // A session already shutting down keeps its terminal state.
        {
            let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
            if matches!(*state, SessionState::Closing | SessionState::Closed) {
                return;
            }
            *state = SessionState::Failed;
        }
        *self.last_error.write().unwrap_or_else(|p| p.into_inner()) = Some(reason);
    }

    async fn release_transport(&self) {
        let mut io = self.io.lock().await;
        match tokio::time::timeout(CLOSE_GRACE_CAP, io.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(server = %self.server, error = %e, "transport close reported an error")
            }
            Err(_) => {
                debug!(server = %self.server, "transport close overran its grace period")
            }
        }
    }

    /// Invoke `tool` with `args`.
    ///
    /// The call is bounded by `deadline` (default 60 s) and can be aborted
    /// through `cancel`: a best-effort cancellation notification goes to the
    /// upstream and the call returns `Cancelled` while the session remains
    /// usable. A session in any state other than `Ready` rejects the call
    /// without touching the transport.
    pub async fn call_tool(
        &self,
        tool: &str,
        args: serde_json::Value,
        deadline: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, GatewayError> {
        if self.state() != SessionState::Ready {
            return Err(GatewayError::NotReady {
                server: self.server.clone(),
            });
        }

        let mut io = self.io.lock().await;

        // The state may have moved to Closing/Failed while this call was
        // queued behind the io mutex.
        if self.state() != SessionState::Ready {
            return Err(GatewayError::NotReady {
                server: self.server.clone(),
            });
        }

        let call_id = self.allocate_id();
        let limit = deadline.unwrap_or(DEFAULT_CALL_TIMEOUT);
        debug!(
            server = %self.server,
            tool = %tool,
            id = call_id,
            deadline_ms = limit.as_millis() as u64,
            "invoking MCP tool"
        );

        enum Outcome {
            Done(Result<JsonRpcMessage, GatewayError>),
            DeadlineExceeded,
            Cancelled,
        }

        let outcome = {
            let io = &mut *io;
            let server = self.server.clone();
            let request = JsonRpcMessage::request(
                call_id,
                "tools/call",
                json!({ "name": tool, "arguments": args }),
            );
            let exchange = async move {
                io.send(request).await?;
                recv_correlated(io, &server, call_id).await
            };
            tokio::pin!(exchange);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::Cancelled,
                _ = tokio::time::sleep(limit) => Outcome::DeadlineExceeded,
                result = &mut exchange => Outcome::Done(result),
            }
        };

        match outcome {
            Outcome::Done(Ok(reply)) => {
                if let Some(error) = reply.error {
                    return Err(GatewayError::tool_execution(
                        &self.server,
                        tool,
                        format!("{} (code {})", error.message, error.code),
                    ));
                }
                Ok(ToolOutput::from_result(
                    reply.result.unwrap_or(serde_json::Value::Null),
                ))
            }
            Outcome::Done(Err(err)) => {
                // The transport died under this call; the session is no
                // longer trustworthy.
                self.record_failure(err.to_string());
                Err(GatewayError::tool_execution(
                    &self.server,
                    tool,
                    err.to_string(),
                ))
            }
            Outcome::DeadlineExceeded => Err(GatewayError::ToolExecution {
                server: self.server.clone(),
                tool: tool.to_string(),
                reason: format!("deadline of {}ms exceeded", limit.as_millis()),
                deadline_exceeded: true,
            }),
            Outcome::Cancelled => {
                let note = JsonRpcMessage::notification(
                    "notifications/cancelled",
                    Some(json!({ "requestId": call_id, "reason": "caller cancelled" })),
                );
                if let Err(e) = io.send(note).await {
                    debug!(server = %self.server, error = %e, "cancel notification not delivered");
                }
                Err(GatewayError::Cancelled {
                    server: self.server.clone(),
                    tool: tool.to_string(),
                })
            }
        }
    }

    /// Re-enumerate the upstream tool catalog and replace the cached copy.
    pub async fn refresh_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError> {
        if self.state() != SessionState::Ready {
            return Err(GatewayError::NotReady {
                server: self.server.clone(),
            });
        }

        let mut io = self.io.lock().await;
        let list_id = self.allocate_id();

        let io = &mut *io;
        let tools = tokio::time::timeout(DEFAULT_CALL_TIMEOUT, async {
            io.send(JsonRpcMessage::request(list_id, "tools/list", json!({})))
                .await?;
            let reply = recv_correlated(io, &self.server, list_id).await?;
            parse_tools_reply(&self.server, reply)
        })
        .await
        .map_err(|_| GatewayError::ConnectionTimeout {
            server: self.server.clone(),
            timeout_secs: DEFAULT_CALL_TIMEOUT.as_secs(),
        })??;

        *self.tools.write().unwrap_or_else(|p| p.into_inner()) = tools.clone();
        Ok(tools)
    }

    /// Close the session.
    ///
    /// Waits for outstanding calls (they hold the io mutex), closes the
    /// transport bounded by `min(timeout_secs, 5s)`, and ends in `Closed`
    /// no matter what. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closing;
        }

        let grace = Duration::from_secs(self.timeout_secs).min(CLOSE_GRACE_CAP);
        let mut io = self.io.lock().await;
        match tokio::time::timeout(grace, io.close()).await {
            Ok(Ok(())) => debug!(server = %self.server, "session closed"),
            Ok(Err(e)) => warn!(server = %self.server, error = %e, "transport close reported an error"),
            Err(_) => warn!(server = %self.server, "transport close timed out"),
        }

        self.set_state(SessionState::Closed);
    }
}

/// Receive messages until one correlates with `id`.
///
/// Notifications and stale replies (for example a response to a call whose
/// deadline already expired) are skipped with a log line.
async fn recv_correlated(
    io: &mut Box<dyn McpTransport>,
    server: &str,
    id: u64,
) -> Result<JsonRpcMessage, GatewayError> {
    for _ in 0..MAX_SKIPPED_MESSAGES {
        let msg = io.recv().await?;
        if msg.id_u64() == Some(id) {
            return Ok(msg);
        }
        if msg.is_notification() {
            debug!(server = %server, method = ?msg.method, "skipping notification");
        } else {
            warn!(
                server = %server,
                got = ?msg.id,
                expected = id,
                "skipping uncorrelated message"
            );
        }
    }
    Err(GatewayError::connection(
        server,
        format!("no reply correlated to request id {id} after {MAX_SKIPPED_MESSAGES} messages"),
    ))
}

/// Extract tool descriptors from a `tools/list` reply.
fn parse_tools_reply(
    server: &str,
    reply: JsonRpcMessage,
) -> Result<Vec<ToolDescriptor>, GatewayError> {
    if let Some(error) = reply.error {
        return Err(GatewayError::connection(
            server,
            format!("tools/list failed: {} (code {})", error.message, error.code),
        ));
    }
    let result = reply.result.ok_or_else(|| {
        GatewayError::connection(server, "tools/list reply carries no result")
    })?;
    let specs: Vec<ToolSpec> = serde_json::from_value(
        result
            .get("tools")
            .cloned()
            .unwrap_or(serde_json::Value::Array(Vec::new())),
    )
    .map_err(|e| GatewayError::connection(server, format!("unparseable tools list: {e}")))?;

    Ok(specs
        .into_iter()
        .map(|spec| ToolDescriptor::from_spec(spec, server))
        .collect())
}
