//! MCP stdio transport.
//!
//! Spawns the configured command as a child process and exchanges
//! newline-delimited JSON-RPC over its stdin/stdout. The parent environment
//! is inherited and then overlaid with the params' env map (placeholders
//! already expanded by the catalog loader). Child stderr is drained by a
//! background task into a bounded tail buffer so connection errors can carry
//! the child's own diagnostics.

use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use warren_types::errors::GatewayError;
use warren_types::params::ServerParams;
use warren_types::rpc::JsonRpcMessage;
use warren_types::traits::McpTransport;

/// How long `close()` waits for the child to exit after stdin is dropped
/// before killing it.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Maximum stderr lines retained for error annotation.
const STDERR_TAIL_LINES: usize = 50;

/// Child-process transport speaking line-framed JSON-RPC.
pub struct StdioTransport {
    server: String,
    child: Child,
    /// Taken on close so dropping it signals EOF to the child.
    stdin: Option<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
    stderr_tail: Arc<StdMutex<Vec<String>>>,
    connected: bool,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("server", &self.server)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl StdioTransport {
    /// Spawn the child process described by `params`.
    ///
    /// Fails with `Connection` when the executable cannot be started; the
    /// handshake deadline is enforced by the session layer.
    pub async fn spawn(params: &ServerParams) -> Result<Self, GatewayError> {
        let command = params.command.as_deref().ok_or_else(|| {
            GatewayError::invalid_server_config(&params.name, "stdio transport requires a command")
        })?;

        let mut cmd = Command::new(command);
        cmd.args(&params.args)
            .envs(&params.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            server = %params.name,
            command = %command,
            args = ?params.args,
            "spawning stdio MCP server"
        );

        let mut child = cmd.spawn().map_err(|e| {
            GatewayError::connection(&params.name, format!("failed to spawn '{command}': {e}"))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            GatewayError::connection(&params.name, "child process has no stdin handle")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            GatewayError::connection(&params.name, "child process has no stdout handle")
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            GatewayError::connection(&params.name, "child process has no stderr handle")
        })?;

        // Drain stderr in the background; keep a bounded tail for error
        // annotation and log everything else at debug level.
        let stderr_tail = Arc::new(StdMutex::new(Vec::new()));
        let tail = Arc::clone(&stderr_tail);
        let server = params.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(server = %server, "stderr: {line}");
                let mut tail = tail.lock().unwrap_or_else(|p| p.into_inner());
                if tail.len() >= STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
        });

        Ok(Self {
            server: params.name.clone(),
            child,
            stdin: Some(stdin),
            lines: BufReader::new(stdout).lines(),
            stderr_tail,
            connected: true,
        })
    }

    /// The retained tail of the child's stderr, newline-joined.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .join("\n")
    }

    fn connection_error(&self, reason: String) -> GatewayError {
        let stderr = self.stderr_tail();
        let reason = if stderr.is_empty() {
            reason
        } else {
            format!("{reason}; stderr: {stderr}")
        };
        GatewayError::connection(&self.server, reason)
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), GatewayError> {
        if !self.connected {
            return Err(GatewayError::connection(&self.server, "transport is closed"));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| GatewayError::connection(&self.server, "stdin already released"))?;

        let mut frame = serde_json::to_string(&message).map_err(|e| {
            GatewayError::connection(&self.server, format!("failed to encode frame: {e}"))
        })?;
        frame.push('\n');

        debug!(
            server = %self.server,
            method = ?message.method,
            id = ?message.id,
            "sending JSON-RPC frame over stdio"
        );

        let written = match stdin.write_all(frame.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            self.connected = false;
            return Err(self.connection_error(format!("failed to write to child stdin: {e}")));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<JsonRpcMessage, GatewayError> {
        if !self.connected {
            return Err(GatewayError::connection(&self.server, "transport is closed"));
        }

        let line = match self.lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                self.connected = false;
                let status = self
                    .child
                    .try_wait()
                    .ok()
                    .flatten()
                    .map(|s| format!(" (exit status {s})"))
                    .unwrap_or_default();
                return Err(
                    self.connection_error(format!("child closed its stdout{status}"))
                );
            }
            Err(e) => {
                self.connected = false;
                return Err(self.connection_error(format!("failed to read child stdout: {e}")));
            }
        };

        serde_json::from_str(&line).map_err(|e| {
            self.connection_error(format!("malformed JSON-RPC frame from child: {e}"))
        })
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        self.connected = false;

        // Dropping stdin signals EOF; well-behaved servers exit on it.
        drop(self.stdin.take());

        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(server = %self.server, status = %status, "stdio MCP server exited");
            }
            Ok(Err(e)) => {
                warn!(server = %self.server, error = %e, "failed to await child exit; killing");
                let _ = self.child.kill().await;
            }
            Err(_) => {
                warn!(server = %self.server, "child did not exit in time; killing");
                let _ = self.child.kill().await;
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
