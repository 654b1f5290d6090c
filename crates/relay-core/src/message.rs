//! Chat message data model.
//!
//! The wire shape is duck-typed JSON (OpenAI-compatible): a flat object with
//! an optional `content` that is either a string or a list of content parts.
//! [`WireMessage`] captures that shape for `serde`; [`ChatMessage`] is the
//! tagged-union domain type the transforms (masking, pruning, sanitizing)
//! actually operate on, per the "duck-typed payloads -> tagged variants"
//! convention.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Value>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(s) => Some(s),
            MessageContent::Parts(_) => None,
        }
    }

    pub fn char_len(&self) -> usize {
        match self {
            MessageContent::Text(s) => s.chars().count(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| p.to_string().chars().count())
                .sum(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

/// Flat wire representation, mirroring what an OpenAI-compatible client
/// actually sends/receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Tagged-union domain type used by every transform in this crate.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System {
        content: MessageContent,
    },
    User {
        content: MessageContent,
    },
    Assistant {
        content: Option<MessageContent>,
        tool_calls: Option<Vec<ToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: MessageContent,
    },
    /// Forward-compatible escape hatch for roles the transforms don't need
    /// to understand (e.g. provider-specific system-of-record roles).
    Raw {
        role: String,
        raw: WireMessage,
    },
}

impl ChatMessage {
    pub fn role(&self) -> &str {
        match self {
            ChatMessage::System { .. } => "system",
            ChatMessage::User { .. } => "user",
            ChatMessage::Assistant { .. } => "assistant",
            ChatMessage::Tool { .. } => "tool",
            ChatMessage::Raw { role, .. } => role.as_str(),
        }
    }

    pub fn content_text(&self) -> Option<&str> {
        match self {
            ChatMessage::System { content } | ChatMessage::User { content } => content.as_text(),
            ChatMessage::Assistant { content, .. } => content.as_ref().and_then(|c| c.as_text()),
            ChatMessage::Tool { content, .. } => content.as_text(),
            ChatMessage::Raw { .. } => None,
        }
    }
}

impl From<WireMessage> for ChatMessage {
    fn from(w: WireMessage) -> Self {
        match w.role.as_str() {
            "system" => ChatMessage::System {
                content: w.content.unwrap_or(MessageContent::Text(String::new())),
            },
            "user" => ChatMessage::User {
                content: w.content.unwrap_or(MessageContent::Text(String::new())),
            },
            "assistant" => ChatMessage::Assistant {
                content: w.content,
                tool_calls: w.tool_calls,
            },
            "tool" => ChatMessage::Tool {
                tool_call_id: w.tool_call_id.unwrap_or_default(),
                content: w.content.unwrap_or(MessageContent::Text(String::new())),
            },
            other => ChatMessage::Raw {
                role: other.to_string(),
                raw: w,
            },
        }
    }
}

impl From<ChatMessage> for WireMessage {
    fn from(m: ChatMessage) -> Self {
        match m {
            ChatMessage::System { content } => WireMessage {
                role: "system".to_string(),
                content: Some(content),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            ChatMessage::User { content } => WireMessage {
                role: "user".to_string(),
                content: Some(content),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => WireMessage {
                role: "assistant".to_string(),
                content,
                tool_calls,
                tool_call_id: None,
                name: None,
            },
            ChatMessage::Tool {
                tool_call_id,
                content,
            } => WireMessage {
                role: "tool".to_string(),
                content: Some(content),
                tool_calls: None,
                tool_call_id: Some(tool_call_id),
                name: None,
            },
            ChatMessage::Raw { raw, .. } => raw,
        }
    }
}

pub fn messages_from_wire(wire: Vec<WireMessage>) -> Vec<ChatMessage> {
    wire.into_iter().map(ChatMessage::from).collect()
}

pub fn messages_to_wire(messages: Vec<ChatMessage>) -> Vec<WireMessage> {
    messages.into_iter().map(WireMessage::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_text_content_through_wire() {
        let wire = WireMessage {
            role: "user".to_string(),
            content: Some(MessageContent::Text("hi".to_string())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        };
        let msg: ChatMessage = wire.into();
        assert_eq!(msg.content_text(), Some("hi"));
        let back: WireMessage = msg.into();
        assert_eq!(back.role, "user");
    }

    #[test]
    fn unknown_role_becomes_raw() {
        let wire = WireMessage {
            role: "developer".to_string(),
            content: Some(MessageContent::Text("x".to_string())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        };
        let msg: ChatMessage = wire.into();
        assert_eq!(msg.role(), "developer");
        assert!(matches!(msg, ChatMessage::Raw { .. }));
    }
}
