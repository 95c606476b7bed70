/// Application-level tool model.
///
/// [`ToolDescriptor`] is the bind-time copy of a tool definition handed to
/// agents; it stays valid even if the underlying session re-enumerates its
/// catalog. [`ToolOutput`] is the normalized result of a `tools/call`.
use serde::{Deserialize, Serialize};

use crate::rpc::ToolSpec;

/// A tool exposed by an upstream MCP server, annotated with the server it
/// came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within its server.
    pub name: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// JSON Schema fragment for the tool's input.
    pub input_schema: serde_json::Value,
    /// Name of the server that exposes this tool. Weak back-reference: the
    /// descriptor never owns any session state.
    pub server: String,
}

impl ToolDescriptor {
    /// Build a descriptor from a wire-level spec.
    pub fn from_spec(spec: ToolSpec, server: &str) -> Self {
        Self {
            name: spec.name,
            description: spec.description,
            input_schema: spec.input_schema,
            server: server.to_string(),
        }
    }

    /// Convert back into the wire-level spec (drops the server annotation).
    pub fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Normalized result of a tool invocation.
///
/// `content` is the concatenation of the upstream's text content blocks;
/// `raw` retains the full result value for callers that need structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Flattened text content.
    pub content: String,
    /// Whether the upstream flagged the result as an error.
    pub is_error: bool,
    /// The raw `result` value from the JSON-RPC response.
    pub raw: serde_json::Value,
}

impl ToolOutput {
    /// Normalize a raw `tools/call` result value.
    ///
    /// MCP results carry a `content` array of typed blocks; text blocks are
    /// concatenated with newlines. Results without text fall back to the
    /// compact JSON rendering of the raw value.
    pub fn from_result(raw: serde_json::Value) -> Self {
        let is_error = raw
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let mut parts: Vec<String> = Vec::new();
        if let Some(blocks) = raw.get("content").and_then(|c| c.as_array()) {
            for block in blocks {
                if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        parts.push(text.to_string());
                    }
                }
            }
        }

        let content = if parts.is_empty() {
            raw.to_string()
        } else {
            parts.join("\n")
        };

        Self {
            content,
            is_error,
            raw,
        }
    }
}

/// A request-scoped tool selection: one server, optionally narrowed to a
/// subset of its functions. Absent `functions` means the entire server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSelection {
    /// Server to draw tools from.
    pub server: String,
    /// Ordered list of function names, or `None` for all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<String>>,
}
