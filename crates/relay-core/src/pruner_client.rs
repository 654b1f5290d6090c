//! Context pruner client (C5): calls the local MCP pruner server to shrink
//! oversized `role=tool` bodies. Fail-open — any error leaves the affected
//! message's `content` unchanged.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::goal_hint::{GoalHintConfig, derive_goal_hint};
use crate::message::{ChatMessage, MessageContent};
use crate::rpc::{RpcRequest, RpcResponse};

#[derive(Debug, Clone)]
pub struct PrunerClientConfig {
    pub enabled: bool,
    pub base_url: String,
    pub min_chars_to_prune: usize,
    pub call_timeout_ms: u64,
    pub max_prune_ratio: f64,
    pub min_keep_lines: usize,
    pub annotate_lines: bool,
    pub include_markers: bool,
    pub source_type: String,
}

impl Default for PrunerClientConfig {
    fn default() -> Self {
        PrunerClientConfig {
            enabled: true,
            base_url: "http://127.0.0.1:8801".to_string(),
            min_chars_to_prune: 4000,
            call_timeout_ms: 2000,
            max_prune_ratio: 0.6,
            min_keep_lines: 10,
            annotate_lines: false,
            include_markers: true,
            source_type: "docs".to_string(),
        }
    }
}

#[derive(Debug)]
enum PrunerClientError {
    Timeout,
    Transport(String),
    Http(u16),
    Parse(String),
}

pub struct PrunerClient {
    http: Client,
    config: PrunerClientConfig,
}

impl PrunerClient {
    pub fn new(config: PrunerClientConfig) -> Self {
        PrunerClient {
            http: Client::new(),
            config,
        }
    }

    /// Applied after C4, still on the wire-shaped message array.
    pub async fn prune(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        if !self.config.enabled {
            return messages.to_vec();
        }
        let goal_hint = derive_goal_hint(messages, &GoalHintConfig::default());
        let mut out = Vec::with_capacity(messages.len());
        for message in messages {
            match message {
                ChatMessage::Tool {
                    tool_call_id,
                    content,
                } => out.push(self.maybe_prune_one(tool_call_id, content, &goal_hint).await),
                other => out.push(other.clone()),
            }
        }
        out
    }

    async fn maybe_prune_one(
        &self,
        tool_call_id: &str,
        content: &MessageContent,
        goal_hint: &str,
    ) -> ChatMessage {
        let unchanged = || ChatMessage::Tool {
            tool_call_id: tool_call_id.to_string(),
            content: content.clone(),
        };

        let text = match content.as_text() {
            Some(t) if t.chars().count() > self.config.min_chars_to_prune => t,
            _ => return unchanged(),
        };

        match self.call_prune_text(text, goal_hint).await {
            Ok(pruned_text) => ChatMessage::Tool {
                tool_call_id: tool_call_id.to_string(),
                content: MessageContent::Text(pruned_text),
            },
            Err(_) => unchanged(),
        }
    }

    async fn call_prune_text(
        &self,
        text: &str,
        goal_hint: &str,
    ) -> Result<String, PrunerClientError> {
        let params = serde_json::json!({
            "name": "prune_text",
            "arguments": {
                "text": text,
                "goal_hint": goal_hint,
                "source_type": self.config.source_type,
                "options": {
                    "max_prune_ratio": self.config.max_prune_ratio,
                    "min_keep_lines": self.config.min_keep_lines,
                    "timeout_ms": self.config.call_timeout_ms,
                    "annotate_lines": self.config.annotate_lines,
                    "include_markers": self.config.include_markers,
                }
            }
        });
        let req = RpcRequest::new(Value::from(1), "tools/call", params);

        let send = self
            .http
            .post(format!("{}/rpc", self.config.base_url))
            .json(&req)
            .send();

        let resp = tokio::time::timeout(Duration::from_millis(self.config.call_timeout_ms), send)
            .await
            .map_err(|_| PrunerClientError::Timeout)?
            .map_err(|e| PrunerClientError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PrunerClientError::Http(resp.status().as_u16()));
        }

        let body: RpcResponse = resp
            .json()
            .await
            .map_err(|e| PrunerClientError::Parse(e.to_string()))?;
        let result = body
            .result
            .ok_or_else(|| PrunerClientError::Parse("missing result".to_string()))?;
        let text = result["content"][0]["text"]
            .as_str()
            .ok_or_else(|| PrunerClientError::Parse("missing content[0].text".to_string()))?;
        let payload: Value =
            serde_json::from_str(text).map_err(|e| PrunerClientError::Parse(e.to_string()))?;
        payload["pruned_text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| PrunerClientError::Parse("missing pruned_text".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_msg(id: &str, content: &str) -> ChatMessage {
        ChatMessage::Tool {
            tool_call_id: id.to_string(),
            content: MessageContent::Text(content.to_string()),
        }
    }

    #[tokio::test]
    async fn short_content_is_left_untouched() {
        let client = PrunerClient::new(PrunerClientConfig::default());
        let messages = vec![tool_msg("call_1", "short output")];
        let pruned = client.prune(&messages).await;
        assert_eq!(pruned, messages);
    }

    #[tokio::test]
    async fn unreachable_server_fails_open() {
        let config = PrunerClientConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            min_chars_to_prune: 5,
            call_timeout_ms: 500,
            ..PrunerClientConfig::default()
        };
        let client = PrunerClient::new(config);
        let long_text = "x".repeat(10_000);
        let messages = vec![tool_msg("call_1", &long_text)];
        let pruned = client.prune(&messages).await;
        assert_eq!(pruned, messages);
    }

    #[tokio::test]
    async fn non_tool_messages_pass_through() {
        let client = PrunerClient::new(PrunerClientConfig::default());
        let messages = vec![ChatMessage::User {
            content: MessageContent::Text("hi".to_string()),
        }];
        let pruned = client.prune(&messages).await;
        assert_eq!(pruned, messages);
    }
}
