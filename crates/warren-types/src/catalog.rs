/// Catalog loader: the declarative server configuration document.
///
/// The catalog is a JSON document keyed by server name:
///
/// ```json
/// {
///   "mcpServers": {
///     "fs": {
///       "type": "stdio",
///       "command": "echo-mcp",
///       "args": ["--root", "/tmp"],
///       "env": {"ROOT": "{BASE_PATH}/data"},
///       "timeout_seconds": 5
///     },
///     "peer": {
///       "type": "http",
///       "url": "https://peer.example/mcp",
///       "auth": {"type": "bearer", "token": "..."}
///     }
///   }
/// }
/// ```
///
/// The loader is pure: it parses, applies defaults, validates invariants,
/// and resolves the `{BASE_PATH}` placeholder. It never talks to upstream
/// servers and never mutates global state.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::params::{
    AuthScheme, HttpAuth, ServerParams, TransportKind, DEFAULT_TIMEOUT_SECS,
};

/// Placeholder in `env` values resolved to the loader's base path.
const BASE_PATH_PLACEHOLDER: &str = "{BASE_PATH}";

/// Raw document shape, as persisted on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, CatalogEntry>,
}

/// One raw catalog entry, before validation and default insertion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Transport discriminator. `type` is the preferred key; `transport`
    /// is accepted as a fallback spelling.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(
        rename = "timeout_seconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Values may be JSON strings, numbers, or booleans; everything is
    /// coerced to a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<CatalogAuth>,
}

/// Raw auth block of a catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogAuth {
    #[serde(rename = "type", default = "default_auth_type")]
    pub kind: String,
    pub token: String,
    #[serde(rename = "header_name", default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
}

fn default_auth_type() -> String {
    "bearer".to_string()
}

/// Parses catalog documents into validated [`ServerParams`].
#[derive(Debug, Clone)]
pub struct CatalogLoader {
    base_path: PathBuf,
    default_timeout_secs: u64,
}

impl Default for CatalogLoader {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl CatalogLoader {
    /// A loader resolving `{BASE_PATH}` to the given root.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Override the default timeout inherited by entries without one.
    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// Parse a catalog document from its JSON text.
    ///
    /// Entries come back sorted by name for deterministic startup order.
    /// Any invalid entry fails the whole load with `InvalidConfig`.
    pub fn parse(&self, text: &str) -> Result<Vec<ServerParams>, GatewayError> {
        let doc: CatalogDocument = serde_json::from_str(text)
            .map_err(|e| GatewayError::invalid_config(format!("catalog is not valid JSON: {e}")))?;
        self.from_document(&doc)
    }

    /// Convert an already-parsed document into validated params.
    pub fn from_document(&self, doc: &CatalogDocument) -> Result<Vec<ServerParams>, GatewayError> {
        let mut params = Vec::with_capacity(doc.mcp_servers.len());
        for (name, entry) in &doc.mcp_servers {
            params.push(self.entry_to_params(name, entry)?);
        }
        Ok(params)
    }

    /// Read and parse a catalog file.
    pub fn load_file(&self, path: &Path) -> Result<Vec<ServerParams>, GatewayError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::invalid_config(format!("failed to read {}: {e}", path.display()))
        })?;
        self.parse(&text)
    }

    /// Read the catalog from `custom` when it exists, falling back to the
    /// packaged default document.
    pub fn load_with_fallback(
        &self,
        custom: Option<&Path>,
        bundled: &Path,
    ) -> Result<Vec<ServerParams>, GatewayError> {
        match custom {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "loading MCP server catalog");
                self.load_file(path)
            }
            _ => {
                tracing::info!(path = %bundled.display(), "using bundled MCP server catalog");
                self.load_file(bundled)
            }
        }
    }

    fn entry_to_params(
        &self,
        name: &str,
        entry: &CatalogEntry,
    ) -> Result<ServerParams, GatewayError> {
        if name.trim().is_empty() {
            return Err(GatewayError::invalid_config(
                "catalog entry has an empty server name",
            ));
        }

        let transport = self.resolve_transport(name, entry)?;
        let enabled = entry.enabled.unwrap_or(true);
        let timeout_secs = entry.timeout_seconds.unwrap_or(self.default_timeout_secs);
        let description = entry.description.clone().unwrap_or_default();

        let params = match transport {
            TransportKind::Stdio => ServerParams {
                name: name.to_string(),
                transport,
                enabled,
                timeout_secs,
                description,
                command: entry.command.clone(),
                args: entry.args.clone().unwrap_or_default(),
                env: self.expand_env(entry.env.as_ref()),
                url: None,
                auth: None,
            },
            TransportKind::Http => ServerParams {
                name: name.to_string(),
                transport,
                enabled,
                timeout_secs,
                description,
                command: None,
                args: Vec::new(),
                env: BTreeMap::new(),
                url: entry.url.as_ref().map(|u| u.trim().to_string()),
                auth: entry
                    .auth
                    .as_ref()
                    .map(|a| resolve_auth(name, a))
                    .transpose()?,
            },
        };

        params.validate()?;
        Ok(params)
    }

    /// Resolve the transport discriminator, defaulting to stdio only when a
    /// command is present (backward compatibility with command-only entries).
    fn resolve_transport(
        &self,
        name: &str,
        entry: &CatalogEntry,
    ) -> Result<TransportKind, GatewayError> {
        let declared = entry.kind.as_deref().or(entry.transport.as_deref());
        match declared.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("stdio") => Ok(TransportKind::Stdio),
            // `sse` is a legacy alias for the streamable HTTP transport.
            Some("http") | Some("sse") => Ok(TransportKind::Http),
            Some(other) => Err(GatewayError::invalid_server_config(
                name,
                format!("unknown transport '{other}'"),
            )),
            None if entry.command.is_some() => Ok(TransportKind::Stdio),
            None => Err(GatewayError::invalid_server_config(
                name,
                "entry has neither a transport type nor a command",
            )),
        }
    }

    /// Coerce env values to strings and expand `{BASE_PATH}`. Unknown
    /// placeholders pass through verbatim.
    fn expand_env(
        &self,
        env: Option<&BTreeMap<String, serde_json::Value>>,
    ) -> BTreeMap<String, String> {
        let base = self.base_path.to_string_lossy();
        env.map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let text = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), text.replace(BASE_PATH_PLACEHOLDER, &base))
                })
                .collect()
        })
        .unwrap_or_default()
    }
}

fn resolve_auth(server: &str, auth: &CatalogAuth) -> Result<HttpAuth, GatewayError> {
    if auth.token.trim().is_empty() {
        return Err(GatewayError::invalid_server_config(
            server,
            "auth block has an empty token",
        ));
    }
    let scheme = match auth.kind.to_ascii_lowercase().as_str() {
        "bearer" => AuthScheme::Bearer,
        "api_key" => AuthScheme::ApiKey,
        other => {
            return Err(GatewayError::invalid_server_config(
                server,
                format!("unknown auth type '{other}'"),
            ))
        }
    };
    Ok(HttpAuth {
        scheme,
        token: auth.token.clone(),
        header_name: auth.header_name.clone(),
    })
}

/// Serialize params back into the persisted document shape.
///
/// `to_document(parse(doc))` is semantically equal to `doc` modulo default
/// insertion (explicit `enabled`/`timeout_seconds`, normalized transport).
pub fn to_document(params: &[ServerParams]) -> CatalogDocument {
    let mut doc = CatalogDocument::default();
    for p in params {
        let entry = CatalogEntry {
            kind: Some(p.transport.to_string()),
            transport: None,
            enabled: Some(p.enabled),
            timeout_seconds: Some(p.timeout_secs),
            description: if p.description.is_empty() {
                None
            } else {
                Some(p.description.clone())
            },
            command: p.command.clone(),
            args: if p.args.is_empty() {
                None
            } else {
                Some(p.args.clone())
            },
            env: if p.env.is_empty() {
                None
            } else {
                Some(
                    p.env
                        .iter()
                        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                        .collect(),
                )
            },
            url: p.url.clone(),
            auth: p.auth.as_ref().map(|a| CatalogAuth {
                kind: match a.scheme {
                    AuthScheme::Bearer => "bearer".to_string(),
                    AuthScheme::ApiKey => "api_key".to_string(),
                },
                token: a.token.clone(),
                header_name: a.header_name.clone(),
            }),
        };
        doc.mcp_servers.insert(p.name.clone(), entry);
    }
    doc
}
