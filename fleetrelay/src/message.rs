// Chat message model
//
// The wire shape the chat client posts for each turn, and the rules for
// flattening one of those messages into the plain text that is persisted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message of a chat turn as sent by the client.
///
/// Fields this relay does not interpret are kept in `extra` so the message
/// reaches the agent unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: Some(content.into()),
            parts: Vec::new(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message has no text content")]
    Empty,
}

/// Plain text of a message: `content` when non-empty, otherwise the text of
/// its parts joined together, reasoning parts excluded.
pub fn message_text(message: &ChatMessage) -> Result<String, MessageError> {
    if let Some(content) = message.content.as_deref().filter(|c| !c.is_empty()) {
        return Ok(content.to_string());
    }

    let text: String = message
        .parts
        .iter()
        .filter(|p| !p.is_null() && !is_reasoning_part(p))
        .map(|p| match p {
            Value::String(s) => s.as_str(),
            other => other.get("text").and_then(Value::as_str).unwrap_or_default(),
        })
        .collect();

    if text.is_empty() {
        Err(MessageError::Empty)
    } else {
        Ok(text)
    }
}

/// Whether a message part carries model reasoning rather than answer text.
pub fn is_reasoning_part(part: &Value) -> bool {
    let Some(obj) = part.as_object() else {
        return false;
    };

    let str_field = |key: &str| obj.get(key).and_then(Value::as_str);

    if let Some(t) = str_field("type") {
        if matches!(
            t,
            "reasoning" | "reasoning-start" | "reasoning-delta" | "reasoning-end"
        ) {
            return true;
        }
    }
    if ["channel", "name", "key", "id"]
        .iter()
        .any(|k| str_field(k) == Some("reasoning"))
    {
        return true;
    }
    obj.get("metadata")
        .and_then(|m| m.get("reasoning"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
