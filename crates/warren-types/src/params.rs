/// Server parameter types.
///
/// A [`ServerParams`] describes one upstream MCP server: either a local
/// child process (stdio) or a remote streamable-HTTP endpoint. Parameters
/// are immutable once loaded; reload rebuilds a session from them.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

/// Default connect+handshake timeout, inherited when the catalog entry does
/// not set one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Transport used to reach an upstream MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking line-framed JSON-RPC over stdin/stdout.
    Stdio,
    /// Streamable HTTP: POST-initiated session, SSE responses.
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

/// Authentication scheme for HTTP transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// `<header_name | X-API-Key>: <token>`.
    ApiKey,
}

/// HTTP authentication configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpAuth {
    pub scheme: AuthScheme,
    pub token: String,
    /// Custom header name; defaults depend on the scheme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
}

impl HttpAuth {
    /// A bearer-token auth config.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::Bearer,
            token: token.into(),
            header_name: None,
        }
    }

    /// An API-key auth config using the default `X-API-Key` header.
    pub fn api_key(token: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::ApiKey,
            token: token.into(),
            header_name: None,
        }
    }

    /// The `(name, value)` header pair this auth config produces.
    pub fn header(&self) -> (String, String) {
        match self.scheme {
            AuthScheme::Bearer => (
                self.header_name
                    .clone()
                    .unwrap_or_else(|| "Authorization".to_string()),
                format!("Bearer {}", self.token),
            ),
            AuthScheme::ApiKey => (
                self.header_name
                    .clone()
                    .unwrap_or_else(|| "X-API-Key".to_string()),
                self.token.clone(),
            ),
        }
    }
}

/// Descriptor for one upstream MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerParams {
    /// Unique name within the catalog.
    pub name: String,
    /// Transport used to reach the server.
    pub transport: TransportKind,
    /// Whether the manager starts this server.
    pub enabled: bool,
    /// Connect+handshake bound in seconds.
    pub timeout_secs: u64,
    /// Free-text description.
    pub description: String,

    // stdio transport
    /// Executable for stdio transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Ordered argument list for stdio transport.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment overlay for stdio transport (placeholders expanded by
    /// the catalog loader).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    // http transport
    /// Absolute endpoint URL for HTTP transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Optional HTTP authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<HttpAuth>,
}

impl ServerParams {
    /// Build stdio params with defaults.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio,
            enabled: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            description: String::new(),
            command: Some(command.into()),
            args: Vec::new(),
            env: BTreeMap::new(),
            url: None,
            auth: None,
        }
    }

    /// Build HTTP params with defaults.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Http,
            enabled: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            description: String::new(),
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            url: Some(url.into()),
            auth: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(
        mut self,
        env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_http(&self) -> bool {
        self.transport == TransportKind::Http
    }

    /// Validate the invariants this descriptor must satisfy.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::invalid_config("server name must not be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(GatewayError::invalid_server_config(
                &self.name,
                "timeout_seconds must be positive",
            ));
        }
        match self.transport {
            TransportKind::Stdio => match &self.command {
                Some(cmd) if !cmd.trim().is_empty() => Ok(()),
                _ => Err(GatewayError::invalid_server_config(
                    &self.name,
                    "stdio transport requires a non-empty command",
                )),
            },
            TransportKind::Http => {
                let url = self.url.as_deref().unwrap_or("");
                if url.trim().is_empty() {
                    return Err(GatewayError::invalid_server_config(
                        &self.name,
                        "http transport requires a url",
                    ));
                }
                validate_absolute_url(&self.name, url)
            }
        }
    }
}

/// Require an absolute `http://` or `https://` URL with a host component.
pub fn validate_absolute_url(server: &str, url: &str) -> Result<(), GatewayError> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| {
            GatewayError::invalid_server_config(
                server,
                format!("url '{url}' must be absolute (http:// or https://)"),
            )
        })?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() {
        return Err(GatewayError::invalid_server_config(
            server,
            format!("url '{url}' has no host"),
        ));
    }
    Ok(())
}
