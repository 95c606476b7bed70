//! Peer registry: runtime management of HTTP-transport upstreams.
//!
//! A thin façade that lets API layers add and remove peers after startup.
//! It validates arguments, restricts itself to the HTTP subset of the
//! manager's catalog, and returns compact status objects; the lifecycle
//! work stays in the manager.

use std::sync::Arc;

use tracing::info;

use warren_types::errors::GatewayError;
use warren_types::params::{validate_absolute_url, TransportKind};
use warren_types::status::PeerStatus;

use crate::manager::McpManager;

/// Runtime API over the manager's HTTP peers.
pub struct PeerRegistry {
    manager: Arc<McpManager>,
}

impl PeerRegistry {
    pub fn new(manager: Arc<McpManager>) -> Self {
        Self { manager }
    }

    /// Register and connect a peer gateway.
    ///
    /// Validates the name and URL shape up front; a name collision with any
    /// existing server (peer or not) fails with `InvalidConfig`.
    pub async fn add(
        &self,
        name: &str,
        url: &str,
        auth_token: Option<String>,
    ) -> Result<PeerStatus, GatewayError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GatewayError::invalid_config("peer name must not be empty"));
        }
        let url = url.trim();
        validate_absolute_url(name, url)?;

        info!(peer = %name, url = %url, "adding MCP peer");
        self.manager.add_peer(name, url, auth_token).await
    }

    /// Disconnect and forget a peer.
    ///
    /// Refuses to remove catalog servers that are not HTTP peers.
    pub async fn remove(&self, name: &str) -> Result<(), GatewayError> {
        let params = self
            .manager
            .server_params(name)
            .ok_or_else(|| GatewayError::NotFound {
                server: name.to_string(),
            })?;
        if params.transport != TransportKind::Http {
            return Err(GatewayError::invalid_server_config(
                name,
                "not an HTTP peer; only peers can be removed at runtime",
            ));
        }

        info!(peer = %name, "removing MCP peer");
        self.manager.remove_peer(name).await
    }

    /// Status of every HTTP upstream currently registered.
    pub fn list(&self) -> Vec<PeerStatus> {
        self.manager
            .list_servers()
            .into_iter()
            .filter(|status| {
                self.manager
                    .server_params(&status.name)
                    .map(|p| p.transport == TransportKind::Http)
                    .unwrap_or(false)
            })
            .map(|status| PeerStatus {
                name: status.name,
                connected: status.connected,
                function_count: status.function_count,
            })
            .collect()
    }
}
