/// JSON-RPC 2.0 wire types for MCP communication.
///
/// Both sides of the gateway speak these: client sessions build requests and
/// correlate responses by id, and the re-exported server endpoint parses
/// inbound requests and builds responses.
use serde::{Deserialize, Serialize};

/// The protocol revision the gateway negotiates during `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// A JSON-RPC 2.0 message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request id (absent for notifications).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Method name (for requests and notifications).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Parameters (for requests and notifications).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Result (for responses).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error (for error responses).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcMessage {
    /// Build a request with the given id, method, and params.
    pub fn request(id: u64, method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::Value::from(id)),
            method: Some(method.to_string()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    /// Build a notification (no id, no reply expected).
    pub fn notification(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        }
    }

    /// Build a success response correlated to `id`.
    pub fn response(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response correlated to `id`.
    pub fn error_response(id: Option<serde_json::Value>, code: i64, message: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: None,
            params: None,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }

    /// Whether this message is a request (has both method and id).
    pub fn is_request(&self) -> bool {
        self.method.is_some() && self.id.is_some()
    }

    /// Whether this message is a notification (method without id).
    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    /// The id as a u64 when it is numeric.
    pub fn id_u64(&self) -> Option<u64> {
        self.id.as_ref().and_then(|v| v.as_u64())
    }
}

/// A tool definition as carried on the wire by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema fragment describing the tool's input.
    #[serde(rename = "inputSchema", default)]
    pub input_schema: serde_json::Value,
}

/// Standard JSON-RPC error codes used by the gateway.
pub mod error_codes {
    /// The body could not be parsed as JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Request rejected by authentication.
    pub const UNAUTHORIZED: i64 = -32001;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trips() {
        let msg = JsonRpcMessage::request(7, "tools/list", json!({}));
        let text = serde_json::to_string(&msg).unwrap();
        let back: JsonRpcMessage = serde_json::from_str(&text).unwrap();

        assert!(back.is_request());
        assert_eq!(back.id_u64(), Some(7));
        assert_eq!(back.method.as_deref(), Some("tools/list"));
    }

    #[test]
    fn notification_has_no_id() {
        let msg = JsonRpcMessage::notification("notifications/initialized", None);
        assert!(msg.is_notification());
        assert!(!msg.is_request());

        let text = serde_json::to_string(&msg).unwrap();
        assert!(!text.contains("\"id\""));
    }

    #[test]
    fn tool_spec_uses_camel_case_schema_key() {
        let spec = ToolSpec {
            name: "read_file".to_string(),
            description: Some("Read a file".to_string()),
            input_schema: json!({"type": "object"}),
        };
        let text = serde_json::to_string(&spec).unwrap();
        assert!(text.contains("inputSchema"));

        let back: ToolSpec = serde_json::from_str(
            r#"{"name":"x","inputSchema":{"type":"object","properties":{}}}"#,
        )
        .unwrap();
        assert_eq!(back.name, "x");
        assert!(back.description.is_none());
    }

    #[test]
    fn error_response_carries_code() {
        let msg = JsonRpcMessage::error_response(Some(json!(3)), error_codes::UNAUTHORIZED, "no");
        assert_eq!(msg.error.as_ref().unwrap().code, error_codes::UNAUTHORIZED);
        assert!(msg.result.is_none());
    }
}
