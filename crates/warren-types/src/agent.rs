/// Types exchanged with the conversational agent collaborator.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller identity used when a peer gateway invokes `chat` without one.
pub const PEER_CALLER: &str = "peer-caller";

/// One conversation turn submitted to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Natural-language instruction.
    pub message: String,
    /// Model to use; `None` selects the agent's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_key: Option<String>,
    /// Conversation id for multi-turn tracking; `None` starts a new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Caller identifier.
    pub caller: String,
}

impl ChatRequest {
    /// A request from a peer gateway.
    pub fn from_peer(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            model_key: None,
            conversation_id: None,
            caller: PEER_CALLER.to_string(),
        }
    }

    /// The conversation id, minting a fresh peer-scoped one when absent.
    pub fn conversation_id_or_new(&self) -> String {
        self.conversation_id
            .clone()
            .unwrap_or_else(|| format!("peer-{}", Uuid::new_v4()))
    }
}

/// The agent's reply to one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    /// Final text produced by the agent.
    pub content: String,
    /// Model that produced the reply.
    pub model: String,
    /// Conversation this turn belongs to.
    pub conversation_id: String,
    /// Identifier of the produced message.
    pub message_id: String,
    /// When the reply was produced.
    pub created_at: DateTime<Utc>,
}
