//! Lifecycle manager for the MCP subsystem.
//!
//! One [`McpManager`] instance orchestrates every upstream server: boot-time
//! initialization from the catalog, per-server state tracking, toolkit
//! lookups, reload, dynamic peers, and ordered shutdown.
//!
//! The server table sits behind a single `std::sync::RwLock` that is only
//! held across map reads and mutations; all transport I/O happens outside
//! it. A per-server lifecycle mutex serializes overlapping reload, remove,
//! and shutdown for the same server while different servers proceed in
//! parallel.

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};

use async_trait::async_trait;
use tracing::{error, info, warn};

use warren_types::errors::GatewayError;
use warren_types::params::{HttpAuth, ServerParams, TransportKind, DEFAULT_TIMEOUT_SECS};
use warren_types::status::{
    InitSummary, PeerStatus, ReloadAllOutcome, ReloadOutcome, ServerStatusInfo, SystemStatus,
};
use warren_types::tool::ToolSelection;
use warren_types::traits::{McpTransport, Toolkit, TransportFactory};

use crate::session::{Session, SessionState};
use crate::toolkit::bind_toolkit;
use crate::transport_http::HttpTransport;
use crate::transport_stdio::StdioTransport;

/// Builds real transports from server params.
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn connect(
        &self,
        params: &ServerParams,
    ) -> Result<Box<dyn McpTransport>, GatewayError> {
        match params.transport {
            TransportKind::Stdio => Ok(Box::new(StdioTransport::spawn(params).await?)),
            TransportKind::Http => Ok(Box::new(HttpTransport::new(params)?)),
        }
    }
}

/// One tracked server: its immutable params plus mutable session state.
struct ServerEntry {
    params: ServerParams,
    /// Lifecycle phase before a session exists (Pending, Initializing,
    /// Failed-at-boot, Closed). Once `session` is present, the session's own
    /// state is authoritative.
    phase: SessionState,
    last_error: Option<String>,
    session: Option<Arc<Session>>,
    /// Serializes reload/remove/shutdown for this server.
    lifecycle: Arc<tokio::sync::Mutex<()>>,
}

impl ServerEntry {
    fn new(params: ServerParams) -> Self {
        Self {
            params,
            phase: SessionState::Pending,
            last_error: None,
            session: None,
            lifecycle: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn state(&self) -> SessionState {
        match &self.session {
            Some(session) => session.state(),
            None => self.phase,
        }
    }

    fn last_error(&self) -> Option<String> {
        match &self.session {
            Some(session) => session.last_error().or_else(|| self.last_error.clone()),
            None => self.last_error.clone(),
        }
    }

    fn ready_session(&self) -> Option<Arc<Session>> {
        self.session
            .as_ref()
            .filter(|s| s.state() == SessionState::Ready)
            .cloned()
    }

    fn status(&self) -> ServerStatusInfo {
        let functions: Vec<String> = self
            .ready_session()
            .map(|s| s.tools().into_iter().map(|t| t.name).collect())
            .unwrap_or_default();
        ServerStatusInfo {
            name: self.params.name.clone(),
            description: if self.params.description.is_empty() {
                None
            } else {
                Some(self.params.description.clone())
            },
            enabled: self.params.enabled,
            connected: self.state() == SessionState::Ready,
            function_count: functions.len(),
            functions,
            last_error: self.last_error(),
        }
    }
}

/// Server table plus registration order.
#[derive(Default)]
struct ManagerState {
    entries: HashMap<String, ServerEntry>,
    order: Vec<String>,
}

/// Process-wide orchestrator for MCP servers.
///
/// Construct one instance at startup and tear it down with [`shutdown`];
/// tests build isolated managers freely.
///
/// [`shutdown`]: McpManager::shutdown
pub struct McpManager {
    state: Arc<StdRwLock<ManagerState>>,
    factory: Arc<dyn TransportFactory>,
    default_timeout_secs: u64,
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new(Arc::new(DefaultTransportFactory))
    }
}

impl McpManager {
    /// A manager connecting through the given transport factory.
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            state: Arc::new(StdRwLock::new(ManagerState::default())),
            factory,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Timeout inherited by peers registered without their own.
    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// Initialize every enabled catalog entry concurrently.
    ///
    /// Each server is bounded by its own `timeout_secs`; one server failing
    /// never aborts the others. Failures are captured into the entry's
    /// `last_error` and the summary; they do not propagate. Disabled
    /// entries are registered but not started.
    pub async fn initialize(
        &self,
        catalog: Vec<ServerParams>,
    ) -> Result<InitSummary, GatewayError> {
        let enabled: Vec<ServerParams> = {
            let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
            for params in &catalog {
                if state.entries.contains_key(&params.name) {
                    return Err(GatewayError::invalid_server_config(
                        &params.name,
                        "duplicate server name in catalog",
                    ));
                }
            }
            for params in catalog {
                state.order.push(params.name.clone());
                state
                    .entries
                    .insert(params.name.clone(), ServerEntry::new(params));
            }
            state
                .entries
                .values()
                .filter(|e| e.params.enabled)
                .map(|e| e.params.clone())
                .collect()
        };

        info!(count = enabled.len(), "initializing MCP servers");

        let mut handles = Vec::with_capacity(enabled.len());
        for params in enabled {
            let state = Arc::clone(&self.state);
            let factory = Arc::clone(&self.factory);
            handles.push(tokio::spawn(async move {
                connect_entry(&state, factory.as_ref(), &params).await
            }));
        }

        let mut ready = 0usize;
        let mut failed = 0usize;
        let mut total_functions = 0usize;
        let attempted = handles.len();
        for handle in handles {
            match handle.await {
                Ok(Ok(function_count)) => {
                    ready += 1;
                    total_functions += function_count;
                }
                Ok(Err(_)) => failed += 1,
                Err(e) => {
                    error!(error = %e, "server initialization task panicked");
                    failed += 1;
                }
            }
        }

        let summary = InitSummary {
            ready,
            failed,
            attempted,
            total_functions,
        };
        info!(
            ready = summary.ready,
            failed = summary.failed,
            attempted = summary.attempted,
            total_functions = summary.total_functions,
            "MCP manager initialization summary"
        );
        Ok(summary)
    }

    /// Resolve a toolkit for `server`, optionally narrowed by an allow-list.
    ///
    /// Never suspends: the lookup is a table read and the binding copies
    /// descriptors synchronously.
    pub fn get_toolkit(
        &self,
        server: &str,
        allowed: Option<&[String]>,
    ) -> Result<Toolkit, GatewayError> {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        let entry = state.entries.get(server).ok_or_else(|| GatewayError::NotFound {
            server: server.to_string(),
        })?;
        if !entry.params.enabled {
            return Err(GatewayError::Disabled {
                server: server.to_string(),
            });
        }
        let session = entry.ready_session().ok_or_else(|| GatewayError::NotReady {
            server: server.to_string(),
        })?;
        Ok(bind_toolkit(&session, allowed))
    }

    /// Resolve a request-scoped tool selection to a toolkit.
    ///
    /// An absent function list means the entire server.
    pub fn resolve_selection(&self, selection: &ToolSelection) -> Result<Toolkit, GatewayError> {
        self.get_toolkit(&selection.server, selection.functions.as_deref())
    }

    /// Toolkits of every Ready server, in registration order.
    pub fn ready_toolkits(&self) -> Vec<Toolkit> {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        state
            .order
            .iter()
            .filter_map(|name| state.entries.get(name))
            .filter_map(|entry| entry.ready_session())
            .map(|session| bind_toolkit(&session, None))
            .collect()
    }

    /// Status rows for every catalog entry, including disabled ones.
    pub fn list_servers(&self) -> Vec<ServerStatusInfo> {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        state
            .order
            .iter()
            .filter_map(|name| state.entries.get(name))
            .map(ServerEntry::status)
            .collect()
    }

    /// Names of servers whose session is Ready.
    pub fn available_servers(&self) -> Vec<String> {
        self.list_servers()
            .into_iter()
            .filter(|s| s.connected)
            .map(|s| s.name)
            .collect()
    }

    /// Tool names exposed by one server (empty when it is not Ready).
    pub fn server_functions(&self, server: &str) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        state
            .entries
            .get(server)
            .and_then(ServerEntry::ready_session)
            .map(|s| s.tools().into_iter().map(|t| t.name).collect())
            .unwrap_or_default()
    }

    /// Whether at least one server is currently Ready.
    pub fn is_initialized(&self) -> bool {
        !self.available_servers().is_empty()
    }

    /// Aggregate snapshot for the management surfaces.
    pub fn system_status(&self) -> SystemStatus {
        let servers = self.list_servers();
        let total_functions = servers.iter().map(|s| s.function_count).sum();
        let available_servers = servers
            .iter()
            .filter(|s| s.connected)
            .map(|s| s.name.clone())
            .collect::<Vec<_>>();
        SystemStatus {
            initialized: !available_servers.is_empty(),
            total_servers: servers.len(),
            total_functions,
            available_servers,
            servers,
        }
    }

    /// Close and rebuild one server's session from its params.
    ///
    /// Concurrent reloads of the same server are serialized; reloads of
    /// different servers proceed in parallel. Failures leave the entry in
    /// `Failed` with `last_error` set, then propagate to the caller.
    pub async fn reload(&self, server: &str) -> Result<ReloadOutcome, GatewayError> {
        let (params, lifecycle) = {
            let state = self.state.read().unwrap_or_else(|p| p.into_inner());
            let entry = state.entries.get(server).ok_or_else(|| GatewayError::NotFound {
                server: server.to_string(),
            })?;
            if !entry.params.enabled {
                return Err(GatewayError::Disabled {
                    server: server.to_string(),
                });
            }
            (entry.params.clone(), Arc::clone(&entry.lifecycle))
        };

        let _guard = lifecycle.lock().await;
        info!(server = %server, "reloading MCP server");

        // Swap the old session out before closing it so observers see the
        // previous toolkit or none, never a torn one.
        let old = {
            let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
            match state.entries.get_mut(server) {
                Some(entry) => {
                    entry.phase = SessionState::Initializing;
                    entry.last_error = None;
                    entry.session.take()
                }
                None => {
                    return Err(GatewayError::NotFound {
                        server: server.to_string(),
                    })
                }
            }
        };
        if let Some(old) = old {
            old.close().await;
        }

        let function_count = connect_entry(&self.state, self.factory.as_ref(), &params).await?;
        info!(server = %server, function_count, "MCP server reloaded");
        Ok(ReloadOutcome {
            server: server.to_string(),
            success: true,
            message: "server reloaded".to_string(),
            function_count,
        })
    }

    /// Reload every enabled server, collecting per-server outcomes.
    pub async fn reload_all(&self) -> ReloadAllOutcome {
        let names: Vec<String> = {
            let state = self.state.read().unwrap_or_else(|p| p.into_inner());
            state
                .order
                .iter()
                .filter(|name| {
                    state
                        .entries
                        .get(*name)
                        .map(|e| e.params.enabled)
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        let mut results = Vec::with_capacity(names.len());
        for name in names {
            match self.reload(&name).await {
                Ok(outcome) => results.push(outcome),
                Err(e) => results.push(ReloadOutcome {
                    server: name,
                    success: false,
                    message: e.to_string(),
                    function_count: 0,
                }),
            }
        }

        let reloaded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - reloaded;
        info!(reloaded, failed, "reload of all MCP servers finished");
        ReloadAllOutcome {
            success: reloaded > 0,
            reloaded,
            failed,
            results,
        }
    }

    /// Register an HTTP peer at runtime and connect it immediately.
    ///
    /// A name collision fails with `InvalidConfig` and mutates nothing.
    /// Connection failures leave the entry in `Failed` and propagate.
    pub async fn add_peer(
        &self,
        name: &str,
        url: &str,
        auth_token: Option<String>,
    ) -> Result<PeerStatus, GatewayError> {
        let mut params = ServerParams::http(name, url)
            .with_timeout_secs(self.default_timeout_secs);
        if let Some(token) = auth_token {
            params = params.with_auth(HttpAuth::bearer(token));
        }
        params.validate()?;

        {
            let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
            if state.entries.contains_key(name) {
                return Err(GatewayError::invalid_server_config(
                    name,
                    "a server with this name already exists",
                ));
            }
            state.order.push(name.to_string());
            state
                .entries
                .insert(name.to_string(), ServerEntry::new(params.clone()));
        }

        info!(server = %name, url = %url, "registering MCP peer");
        let function_count = connect_entry(&self.state, self.factory.as_ref(), &params).await?;
        Ok(PeerStatus {
            name: name.to_string(),
            connected: true,
            function_count,
        })
    }

    /// Close a server's session and drop it from the catalog.
    pub async fn remove_peer(&self, name: &str) -> Result<(), GatewayError> {
        let lifecycle = {
            let state = self.state.read().unwrap_or_else(|p| p.into_inner());
            let entry = state.entries.get(name).ok_or_else(|| GatewayError::NotFound {
                server: name.to_string(),
            })?;
            Arc::clone(&entry.lifecycle)
        };

        let _guard = lifecycle.lock().await;
        let removed = {
            let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
            state.order.retain(|n| n != name);
            state.entries.remove(name)
        };

        match removed {
            Some(entry) => {
                if let Some(session) = entry.session {
                    session.close().await;
                }
                info!(server = %name, "MCP peer removed");
                Ok(())
            }
            None => Err(GatewayError::NotFound {
                server: name.to_string(),
            }),
        }
    }

    /// The stored params of one server, when it exists.
    pub fn server_params(&self, name: &str) -> Option<ServerParams> {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        state.entries.get(name).map(|e| e.params.clone())
    }

    /// Close every session in reverse registration order.
    ///
    /// Each close is bounded; errors are logged and swallowed. Idempotent.
    pub async fn shutdown(&self) {
        info!("shutting down MCP manager");
        let names: Vec<String> = {
            let state = self.state.read().unwrap_or_else(|p| p.into_inner());
            state.order.iter().rev().cloned().collect()
        };

        for name in names {
            let (session, lifecycle) = {
                let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
                match state.entries.get_mut(&name) {
                    Some(entry) => {
                        entry.phase = SessionState::Closed;
                        (entry.session.take(), Arc::clone(&entry.lifecycle))
                    }
                    None => continue,
                }
            };
            let _guard = lifecycle.lock().await;
            if let Some(session) = session {
                session.close().await;
            }
        }
        info!("MCP manager shutdown complete");
    }
}

/// Connect one server and install the session into the table.
///
/// Returns the function count on success. On failure the entry is marked
/// `Failed` with `last_error` recorded, and the error is returned for the
/// caller to propagate or swallow as its policy dictates.
async fn connect_entry(
    state: &Arc<StdRwLock<ManagerState>>,
    factory: &dyn TransportFactory,
    params: &ServerParams,
) -> Result<usize, GatewayError> {
    {
        let mut state = state.write().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = state.entries.get_mut(&params.name) {
            entry.phase = SessionState::Initializing;
        }
    }

    let result = async {
        let transport = factory.connect(params).await?;
        Session::handshake(&params.name, params.timeout_secs, transport).await
    }
    .await;

    let mut table = state.write().unwrap_or_else(|p| p.into_inner());
    let Some(entry) = table.entries.get_mut(&params.name) else {
        // Removed while connecting: close the orphan session off-lock.
        drop(table);
        if let Ok(session) = result {
            let session = Arc::new(session);
            tokio::spawn(async move { session.close().await });
        }
        return Err(GatewayError::NotFound {
            server: params.name.clone(),
        });
    };

    match result {
        Ok(session) => {
            let session = Arc::new(session);
            let function_count = session.tools().len();
            entry.session = Some(session);
            entry.phase = SessionState::Ready;
            entry.last_error = None;
            info!(
                server = %params.name,
                function_count,
                "MCP server is ready"
            );
            Ok(function_count)
        }
        Err(e) => {
            entry.session = None;
            entry.phase = SessionState::Failed;
            entry.last_error = Some(e.to_string());
            warn!(server = %params.name, error = %e, "MCP server failed to initialize");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedFactory, ScriptedTransport};
    use serde_json::json;
    use warren_types::rpc::{JsonRpcMessage, MCP_PROTOCOL_VERSION};

    fn init_reply(id: u64) -> JsonRpcMessage {
        JsonRpcMessage::response(
            Some(json!(id)),
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "serverInfo": {"name": "stub", "version": "0"},
            }),
        )
    }

    fn tools_reply(id: u64, names: &[&str]) -> JsonRpcMessage {
        let tools: Vec<_> = names
            .iter()
            .map(|n| json!({"name": n, "inputSchema": {"type": "object"}}))
            .collect();
        JsonRpcMessage::response(Some(json!(id)), json!({ "tools": tools }))
    }

    fn boot_script(names: &[&str]) -> ScriptedTransport {
        ScriptedTransport::new(vec![init_reply(1), tools_reply(2, names)])
    }

    fn manager_with(factory: ScriptedFactory) -> McpManager {
        McpManager::new(Arc::new(factory)).with_default_timeout(5)
    }

    fn stdio_params(name: &str) -> ServerParams {
        ServerParams::stdio(name, "unused").with_timeout_secs(5)
    }

    #[tokio::test]
    async fn initialize_brings_enabled_servers_to_ready() {
        let factory = ScriptedFactory::new();
        factory.script("fs", boot_script(&["read_file", "list_dir"]));
        factory.script("web", boot_script(&["fetch"]));
        let manager = manager_with(factory);

        let summary = manager
            .initialize(vec![stdio_params("fs"), stdio_params("web")])
            .await
            .unwrap();

        assert_eq!(summary.ready, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.total_functions, 3);
        assert!(manager.is_initialized());

        let servers = manager.list_servers();
        assert_eq!(servers.len(), 2);
        assert!(servers.iter().all(|s| s.connected));
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_others() {
        let factory = ScriptedFactory::new();
        // "bogus" has no scripted transport: connect fails like a missing
        // binary would.
        factory.script("good", boot_script(&["fetch"]));
        let manager = manager_with(factory);

        let summary = manager
            .initialize(vec![stdio_params("bogus"), stdio_params("good")])
            .await
            .unwrap();

        assert_eq!(summary.ready, 1);
        assert_eq!(summary.failed, 1);

        let servers = manager.list_servers();
        let bogus = servers.iter().find(|s| s.name == "bogus").unwrap();
        assert!(!bogus.connected);
        assert!(bogus.last_error.is_some());

        let good = servers.iter().find(|s| s.name == "good").unwrap();
        assert!(good.connected);
        assert_eq!(good.function_count, 1);
    }

    #[tokio::test]
    async fn disabled_entries_are_listed_but_never_started() {
        let factory = ScriptedFactory::new();
        factory.script("fs", boot_script(&["read_file"]));
        let manager = manager_with(factory);

        manager
            .initialize(vec![stdio_params("fs"), stdio_params("dormant").disabled()])
            .await
            .unwrap();

        let servers = manager.list_servers();
        let dormant = servers.iter().find(|s| s.name == "dormant").unwrap();
        assert!(!dormant.enabled);
        assert!(!dormant.connected);
        assert_eq!(dormant.function_count, 0);

        let err = manager.get_toolkit("dormant", None).unwrap_err();
        assert!(matches!(err, GatewayError::Disabled { .. }));
    }

    #[tokio::test]
    async fn duplicate_catalog_names_are_rejected() {
        let manager = manager_with(ScriptedFactory::new());
        manager.initialize(vec![stdio_params("fs")]).await.unwrap();

        let err = manager
            .initialize(vec![stdio_params("fs")])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn toolkit_lookup_errors() {
        let factory = ScriptedFactory::new();
        let manager = manager_with(factory);
        manager
            .initialize(vec![stdio_params("broken")])
            .await
            .unwrap();

        let err = manager.get_toolkit("ghost", None).unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { .. }));

        // "broken" had no scripted transport, so it sits in Failed.
        let err = manager.get_toolkit("broken", None).unwrap_err();
        assert!(matches!(err, GatewayError::NotReady { .. }));
    }

    #[tokio::test]
    async fn selections_resolve_like_direct_lookups() {
        let factory = ScriptedFactory::new();
        factory.script("fs", boot_script(&["read_file", "stat"]));
        let manager = manager_with(factory);
        manager.initialize(vec![stdio_params("fs")]).await.unwrap();

        let whole = ToolSelection {
            server: "fs".to_string(),
            functions: None,
        };
        assert_eq!(manager.resolve_selection(&whole).unwrap().tools.len(), 2);

        let narrowed = ToolSelection {
            server: "fs".to_string(),
            functions: Some(vec!["stat".to_string()]),
        };
        assert_eq!(
            manager.resolve_selection(&narrowed).unwrap().tool_names(),
            vec!["stat"]
        );

        let unknown = ToolSelection {
            server: "nope".to_string(),
            functions: None,
        };
        assert!(matches!(
            manager.resolve_selection(&unknown).unwrap_err(),
            GatewayError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn toolkit_respects_allow_list() {
        let factory = ScriptedFactory::new();
        factory.script("fs", boot_script(&["read_file", "list_dir", "stat"]));
        let manager = manager_with(factory);
        manager.initialize(vec![stdio_params("fs")]).await.unwrap();

        let toolkit = manager
            .get_toolkit("fs", Some(&["stat".to_string(), "missing".to_string()]))
            .unwrap();
        assert_eq!(toolkit.tool_names(), vec!["stat"]);

        let all = manager.get_toolkit("fs", None).unwrap();
        assert_eq!(all.tools.len(), 3);
    }

    #[tokio::test]
    async fn add_peer_connects_and_reports_function_count() {
        let factory = ScriptedFactory::new();
        factory.script("peer-b", boot_script(&["chat", "status"]));
        let manager = manager_with(factory);

        let status = manager
            .add_peer("peer-b", "http://peer-b.example/mcp", Some("tok".to_string()))
            .await
            .unwrap();
        assert!(status.connected);
        assert_eq!(status.function_count, 2);

        let params = manager.server_params("peer-b").unwrap();
        assert_eq!(params.transport, TransportKind::Http);
        assert_eq!(params.auth.unwrap().token, "tok");
    }

    #[tokio::test]
    async fn add_peer_name_collision_mutates_nothing() {
        let factory = ScriptedFactory::new();
        factory.script("fs", boot_script(&["read_file"]));
        let manager = manager_with(factory);
        manager.initialize(vec![stdio_params("fs")]).await.unwrap();

        let before = manager.list_servers();
        let err = manager
            .add_peer("fs", "http://elsewhere.example/mcp", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidConfig { .. }));

        let after = manager.list_servers();
        assert_eq!(before.len(), after.len());
        // The stdio server is untouched and still connected.
        assert!(after.iter().find(|s| s.name == "fs").unwrap().connected);
    }

    #[tokio::test]
    async fn add_peer_rejects_relative_urls() {
        let manager = manager_with(ScriptedFactory::new());
        let err = manager.add_peer("p", "not-a-url", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidConfig { .. }));
        assert!(manager.list_servers().is_empty());
    }

    #[tokio::test]
    async fn add_peer_connect_failure_propagates_and_records_state() {
        let manager = manager_with(ScriptedFactory::new());
        let err = manager
            .add_peer("dead", "http://dead.example/mcp", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Connection { .. }));

        // The entry stays, Failed, with the error recorded.
        let servers = manager.list_servers();
        let dead = servers.iter().find(|s| s.name == "dead").unwrap();
        assert!(!dead.connected);
        assert!(dead.last_error.is_some());
    }

    #[tokio::test]
    async fn remove_peer_closes_and_forgets() {
        let factory = ScriptedFactory::new();
        let transport = boot_script(&["chat"]);
        let handle = transport.clone();
        factory.script("peer-b", transport);
        let manager = manager_with(factory);

        manager
            .add_peer("peer-b", "http://peer-b.example/mcp", None)
            .await
            .unwrap();
        manager.remove_peer("peer-b").await.unwrap();

        assert!(!handle.transport_connected());
        assert!(manager.list_servers().is_empty());

        let err = manager.remove_peer("peer-b").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { .. }));
    }

    #[tokio::test]
    async fn removed_name_can_be_registered_again() {
        let factory = ScriptedFactory::new();
        factory.script("peer-b", boot_script(&["chat"]));
        factory.script("peer-b", boot_script(&["chat", "extra"]));
        let manager = manager_with(factory);

        manager
            .add_peer("peer-b", "http://b.example/mcp", None)
            .await
            .unwrap();
        manager.remove_peer("peer-b").await.unwrap();

        let status = manager
            .add_peer("peer-b", "http://b.example/mcp", None)
            .await
            .unwrap();
        assert_eq!(status.function_count, 2);
    }

    #[tokio::test]
    async fn reload_swaps_sessions_and_updates_tools() {
        let factory = ScriptedFactory::new();
        let first = boot_script(&["old_tool"]);
        let first_handle = first.clone();
        factory.script("fs", first);
        factory.script("fs", boot_script(&["new_tool", "second"]));
        let manager = manager_with(factory);

        manager.initialize(vec![stdio_params("fs")]).await.unwrap();
        assert_eq!(manager.server_functions("fs"), vec!["old_tool"]);

        let outcome = manager.reload("fs").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.function_count, 2);
        assert_eq!(manager.server_functions("fs"), vec!["new_tool", "second"]);

        // The pre-reload transport was closed.
        assert!(!first_handle.transport_connected());
    }

    #[tokio::test]
    async fn reload_failure_propagates_with_failed_state() {
        let factory = ScriptedFactory::new();
        factory.script("fs", boot_script(&["tool"]));
        // No second transport: the reload connect fails.
        let manager = manager_with(factory);
        manager.initialize(vec![stdio_params("fs")]).await.unwrap();

        let err = manager.reload("fs").await.unwrap_err();
        assert!(matches!(err, GatewayError::Connection { .. }));

        let servers = manager.list_servers();
        let fs = &servers[0];
        assert!(!fs.connected);
        assert!(fs.last_error.is_some());
    }

    #[tokio::test]
    async fn reload_unknown_and_disabled_servers() {
        let factory = ScriptedFactory::new();
        let manager = manager_with(factory);
        manager
            .initialize(vec![stdio_params("dormant").disabled()])
            .await
            .unwrap();

        let err = manager.reload("ghost").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { .. }));

        let err = manager.reload("dormant").await.unwrap_err();
        assert!(matches!(err, GatewayError::Disabled { .. }));
    }

    #[tokio::test]
    async fn reload_all_collects_per_server_outcomes() {
        let factory = ScriptedFactory::new();
        factory.script("a", boot_script(&["t1"]));
        factory.script("a", boot_script(&["t1"]));
        factory.script("b", boot_script(&["t2"]));
        // No reload transport for "b": its reload fails.
        let manager = manager_with(factory);
        manager
            .initialize(vec![stdio_params("a"), stdio_params("b")])
            .await
            .unwrap();

        let outcome = manager.reload_all().await;
        assert!(outcome.success);
        assert_eq!(outcome.reloaded, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.results.len(), 2);
    }

    #[tokio::test]
    async fn shutdown_closes_everything_and_is_idempotent() {
        let factory = ScriptedFactory::new();
        let t1 = boot_script(&["x"]);
        let t2 = boot_script(&["y"]);
        let (h1, h2) = (t1.clone(), t2.clone());
        factory.script("a", t1);
        factory.script("b", t2);
        let manager = manager_with(factory);
        manager
            .initialize(vec![stdio_params("a"), stdio_params("b")])
            .await
            .unwrap();

        manager.shutdown().await;
        assert!(!h1.transport_connected());
        assert!(!h2.transport_connected());
        assert!(!manager.is_initialized());

        let err = manager.get_toolkit("a", None).unwrap_err();
        assert!(matches!(err, GatewayError::NotReady { .. }));

        // Second shutdown is a no-op.
        manager.shutdown().await;
    }

    /// Scenarios against the real transports: a shell-scripted stdio server
    /// and an axum HTTP stub.
    mod real_transports {
        use super::*;
        use axum::body::Body;
        use axum::extract::Request;
        use axum::response::Response;
        use axum::routing::post;
        use axum::Router;
        use tokio::net::TcpListener;
        use tokio_util::sync::CancellationToken;
        use warren_types::params::HttpAuth;

        fn real_manager() -> McpManager {
            McpManager::new(Arc::new(DefaultTransportFactory))
        }

        /// A stdio MCP server made of canned replies: handshake, catalog,
        /// one tool call.
        fn scripted_stdio(name: &str) -> ServerParams {
            let script = r#"
                printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fs-stub","version":"0.1"}}}'
                printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"ping","inputSchema":{"type":"object"}}]}}'
                printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"pong"}]}}'
                cat > /dev/null
            "#;
            ServerParams::stdio(name, "sh")
                .with_args(["-c", script])
                .with_timeout_secs(5)
        }

        async fn serve_http_stub() -> String {
            let app = Router::new().route(
                "/mcp",
                post(|req: Request| async move {
                    let authorized = req
                        .headers()
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        == Some("Bearer t");
                    if !authorized {
                        return Response::builder()
                            .status(401)
                            .body(Body::from("unauthorized"))
                            .unwrap();
                    }

                    let bytes = axum::body::to_bytes(req.into_body(), 1 << 20)
                        .await
                        .unwrap_or_default();
                    let msg: JsonRpcMessage = match serde_json::from_slice(&bytes) {
                        Ok(msg) => msg,
                        Err(_) => {
                            return Response::builder()
                                .status(400)
                                .body(Body::from("bad request"))
                                .unwrap()
                        }
                    };

                    let body = match msg.method.as_deref() {
                        Some("initialize") => serde_json::to_string(&JsonRpcMessage::response(
                            msg.id,
                            json!({
                                "protocolVersion": MCP_PROTOCOL_VERSION,
                                "capabilities": {},
                                "serverInfo": {"name": "peer-stub", "version": "0.1"},
                            }),
                        ))
                        .unwrap(),
                        Some("tools/list") => serde_json::to_string(&JsonRpcMessage::response(
                            msg.id,
                            json!({"tools": [
                                {"name": "only_one", "inputSchema": {"type": "object"}},
                                {"name": "other_tool", "inputSchema": {"type": "object"}}
                            ]}),
                        ))
                        .unwrap(),
                        Some("tools/call") => serde_json::to_string(&JsonRpcMessage::response(
                            msg.id,
                            json!({"content": [{"type": "text", "text": "peer says hi"}]}),
                        ))
                        .unwrap(),
                        _ => String::new(),
                    };

                    if body.is_empty() {
                        Response::builder()
                            .status(202)
                            .body(Body::empty())
                            .unwrap()
                    } else {
                        Response::builder()
                            .status(200)
                            .header("content-type", "application/json")
                            .header("mcp-session-id", "stub-session")
                            .body(Body::from(body))
                            .unwrap()
                    }
                }),
            );
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            format!("http://{addr}/mcp")
        }

        #[tokio::test]
        async fn stdio_happy_path_end_to_end() {
            let manager = real_manager();
            let summary = manager
                .initialize(vec![scripted_stdio("fs")])
                .await
                .unwrap();
            assert_eq!(summary.ready, 1);

            let servers = manager.list_servers();
            assert!(servers[0].connected);
            assert!(servers[0].function_count > 0);

            let toolkit = manager.get_toolkit("fs", None).unwrap();
            let out = toolkit.tools[0]
                .invoke(json!({}), CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(out.content, "pong");

            manager.shutdown().await;
        }

        #[tokio::test]
        async fn http_peer_with_bearer_end_to_end() {
            let endpoint = serve_http_stub().await;
            let manager = real_manager();

            let params = ServerParams::http("peer", &endpoint)
                .with_auth(HttpAuth::bearer("t"))
                .with_timeout_secs(3);
            let summary = manager.initialize(vec![params]).await.unwrap();
            assert_eq!(summary.ready, 1);

            // Allow-list narrows the two-tool catalog to exactly one.
            let toolkit = manager
                .get_toolkit("peer", Some(&["only_one".to_string()]))
                .unwrap();
            assert_eq!(toolkit.tool_names(), vec!["only_one"]);

            let out = toolkit.tools[0]
                .invoke(json!({}), CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(out.content, "peer says hi");

            manager.shutdown().await;
        }

        #[tokio::test]
        async fn wrong_bearer_fails_initialization() {
            let endpoint = serve_http_stub().await;
            let manager = real_manager();

            let params = ServerParams::http("peer", &endpoint)
                .with_auth(HttpAuth::bearer("wrong"))
                .with_timeout_secs(3);
            let summary = manager.initialize(vec![params]).await.unwrap();
            assert_eq!(summary.failed, 1);

            let servers = manager.list_servers();
            assert!(!servers[0].connected);
            assert!(servers[0].last_error.as_ref().unwrap().contains("401"));
        }

        #[tokio::test]
        async fn shutdown_leaves_no_child_running() {
            let manager = real_manager();
            manager
                .initialize(vec![scripted_stdio("fs")])
                .await
                .unwrap();

            let toolkit = manager.get_toolkit("fs", None).unwrap();
            manager.shutdown().await;

            // The child is gone: a stale toolkit cannot reach it.
            let err = toolkit.tools[0]
                .invoke(json!({}), CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::NotReady { .. }));
        }
    }

    #[tokio::test]
    async fn toolkits_outlive_a_reload_without_dangling() {
        let factory = ScriptedFactory::new();
        let first = boot_script(&["tool_a"]);
        factory.script("fs", first);
        factory.script("fs", boot_script(&["tool_b"]));
        let manager = manager_with(factory);
        manager.initialize(vec![stdio_params("fs")]).await.unwrap();

        let pre = manager.get_toolkit("fs", None).unwrap();
        manager.reload("fs").await.unwrap();
        let post = manager.get_toolkit("fs", None).unwrap();

        // The pre-reload view still holds its bind-time descriptors; the
        // post-reload view sees the new catalog.
        assert_eq!(pre.tool_names(), vec!["tool_a"]);
        assert_eq!(post.tool_names(), vec!["tool_b"]);

        // Invoking through the stale view fails cleanly, not by touching a
        // dead transport.
        let err = pre.tools[0]
            .invoke(json!({}), tokio_util::sync::CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotReady { .. }));
    }
}
