//! Toolkit adapter: a filtered, agent-facing view of one session's tools.
//!
//! The adapter copies tool descriptors at bind time, so the name,
//! description, and input schema remain accessible even if the session
//! re-enumerates its catalog afterwards. Argument validation happens here,
//! before anything touches the transport.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use warren_types::errors::GatewayError;
use warren_types::tool::{ToolDescriptor, ToolOutput};
use warren_types::traits::{CallableTool, Toolkit};

use crate::session::Session;

/// Build a toolkit over `session`, optionally narrowed by `allowed`.
///
/// The visible tool set is the intersection of the session's live catalog
/// with the allow-list (entries whitespace-trimmed, matched
/// case-sensitively). An empty intersection yields a zero-tool toolkit;
/// treating that as a no-op is the caller's business.
pub fn bind_toolkit(session: &Arc<Session>, allowed: Option<&[String]>) -> Toolkit {
    let filter: Option<BTreeSet<String>> = allowed.map(|names| {
        names
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect()
    });

    let tools: Vec<Arc<dyn CallableTool>> = session
        .tools()
        .into_iter()
        .filter(|descriptor| {
            filter
                .as_ref()
                .map(|set| set.contains(&descriptor.name))
                .unwrap_or(true)
        })
        .map(|descriptor| {
            Arc::new(SessionTool {
                descriptor,
                session: Arc::clone(session),
            }) as Arc<dyn CallableTool>
        })
        .collect();

    debug!(
        server = %session.server(),
        tool_count = tools.len(),
        filtered = filter.is_some(),
        "bound MCP toolkit"
    );

    Toolkit {
        server: session.server().to_string(),
        tools,
    }
}

/// One session-backed tool satisfying the capability interface.
struct SessionTool {
    descriptor: ToolDescriptor,
    session: Arc<Session>,
}

#[async_trait]
impl CallableTool for SessionTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> Option<&str> {
        self.descriptor.description.as_deref()
    }

    fn input_schema(&self) -> &serde_json::Value {
        &self.descriptor.input_schema
    }

    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, GatewayError> {
        if let Err(reason) = validate_args(&self.descriptor.input_schema, &args) {
            return Err(GatewayError::InvalidArgs {
                tool: self.descriptor.name.clone(),
                reason,
            });
        }
        self.session
            .call_tool(&self.descriptor.name, args, None, &cancel)
            .await
    }
}

/// Shallow JSON Schema validation: required fields present, primitive types
/// of declared properties match. Nested schemas are the upstream's problem.
fn validate_args(schema: &serde_json::Value, args: &serde_json::Value) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };
    if schema.is_empty() {
        return Ok(());
    }

    let expects_object = schema.get("type").and_then(|t| t.as_str()) == Some("object")
        || schema.contains_key("properties")
        || schema.contains_key("required");
    if !expects_object {
        return Ok(());
    }

    let Some(args) = args.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if !args.contains_key(field) {
                return Err(format!("missing required field '{field}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (field, value) in args {
            let Some(declared) = properties
                .get(field)
                .and_then(|p| p.get("type"))
                .and_then(|t| t.as_str())
            else {
                continue;
            };
            if !type_matches(declared, value) {
                return Err(format!(
                    "field '{field}' must be of type {declared}"
                ));
            }
        }
    }

    Ok(())
}

fn type_matches(declared: &str, value: &serde_json::Value) -> bool {
    match declared {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}
