//! Observation masker — Schema 1 (C4). A pure transform: it never performs
//! I/O and never fails; disabled policies return the input unchanged.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::message::{ChatMessage, MessageContent};

pub const DEFAULT_PLACEHOLDER_TEMPLATE: &str = "[Observation masquée: résultat d’outil ancien (tool_call_id={tool_call_id}, outil={tool_name}, chars={original_chars})]";

#[derive(Debug, Clone)]
pub struct MaskingPolicy {
    pub enabled: bool,
    pub window_turns: usize,
    pub keep_errors: bool,
    pub keep_last_k_per_tool: Option<usize>,
    pub placeholder_template: String,
}

impl Default for MaskingPolicy {
    fn default() -> Self {
        MaskingPolicy {
            enabled: true,
            window_turns: 2,
            keep_errors: true,
            keep_last_k_per_tool: Some(1),
            placeholder_template: DEFAULT_PLACEHOLDER_TEMPLATE.to_string(),
        }
    }
}

struct ToolTurn {
    ids: Vec<String>,
}

/// `mask(messages, policy) -> messages'`. Output length always equals input
/// length; message order and every `tool_calls`/`tool_call_id` are untouched.
pub fn mask(messages: &[ChatMessage], policy: &MaskingPolicy) -> Vec<ChatMessage> {
    if !policy.enabled {
        return messages.to_vec();
    }

    let mut turns: Vec<ToolTurn> = Vec::new();
    let mut id_turn: HashMap<String, usize> = HashMap::new();
    let mut id_tool_name: HashMap<String, String> = HashMap::new();
    let mut occurrence_order: Vec<String> = Vec::new();

    for message in messages {
        if let ChatMessage::Assistant {
            tool_calls: Some(calls),
            ..
        } = message
        {
            if calls.is_empty() {
                continue;
            }
            let turn_index = turns.len();
            let mut ids = Vec::with_capacity(calls.len());
            for call in calls {
                id_turn.insert(call.id.clone(), turn_index);
                id_tool_name.insert(call.id.clone(), call.function.name.clone());
                occurrence_order.push(call.id.clone());
                ids.push(call.id.clone());
            }
            turns.push(ToolTurn { ids });
        }
    }

    let keep_set = build_keep_set(policy, &turns, &occurrence_order, &id_tool_name);

    messages
        .iter()
        .map(|message| mask_one(message, policy, &id_turn, &id_tool_name, &keep_set))
        .collect()
}

fn build_keep_set(
    policy: &MaskingPolicy,
    turns: &[ToolTurn],
    occurrence_order: &[String],
    id_tool_name: &HashMap<String, String>,
) -> HashSet<String> {
    let mut keep_set = HashSet::new();

    if policy.window_turns > 0 && !turns.is_empty() {
        let start = turns.len().saturating_sub(policy.window_turns);
        for turn in &turns[start..] {
            keep_set.extend(turn.ids.iter().cloned());
        }
    }

    if let Some(k) = policy.keep_last_k_per_tool.filter(|k| *k > 0) {
        let mut per_tool: HashMap<&str, Vec<&str>> = HashMap::new();
        for id in occurrence_order {
            if let Some(name) = id_tool_name.get(id) {
                per_tool.entry(name.as_str()).or_default().push(id.as_str());
            }
        }
        for ids in per_tool.values() {
            let start = ids.len().saturating_sub(k);
            keep_set.extend(ids[start..].iter().map(|s| s.to_string()));
        }
    }

    keep_set
}

fn mask_one(
    message: &ChatMessage,
    policy: &MaskingPolicy,
    id_turn: &HashMap<String, usize>,
    id_tool_name: &HashMap<String, String>,
    keep_set: &HashSet<String>,
) -> ChatMessage {
    let (tool_call_id, content) = match message {
        ChatMessage::Tool {
            tool_call_id,
            content,
        } => (tool_call_id, content),
        other => return other.clone(),
    };

    if !id_turn.contains_key(tool_call_id) {
        return message.clone();
    }
    if keep_set.contains(tool_call_id) {
        return message.clone();
    }

    let text = match content.as_text() {
        Some(s) => s,
        None => return message.clone(),
    };

    if policy.keep_errors && looks_like_error(text) {
        return message.clone();
    }

    let tool_name = id_tool_name.get(tool_call_id).cloned().unwrap_or_default();
    let placeholder = render_placeholder(
        &policy.placeholder_template,
        tool_call_id,
        &tool_name,
        text.chars().count(),
    );

    ChatMessage::Tool {
        tool_call_id: tool_call_id.clone(),
        content: MessageContent::Text(placeholder),
    }
}

fn render_placeholder(
    template: &str,
    tool_call_id: &str,
    tool_name: &str,
    original_chars: usize,
) -> String {
    template
        .replace("{tool_call_id}", tool_call_id)
        .replace("{tool_name}", tool_name)
        .replace("{original_chars}", &original_chars.to_string())
}

fn looks_like_error(text: &str) -> bool {
    const NEEDLES: [&str; 5] = [
        "traceback",
        "exception",
        "timeout",
        "connect_error",
        "connection refused",
    ];
    let lower = text.to_lowercase();
    if NEEDLES.iter().any(|n| lower.contains(n)) {
        return true;
    }
    if text
        .lines()
        .any(|line| line.trim_start().to_lowercase().starts_with("error"))
    {
        return true;
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        if map.contains_key("error") {
            return true;
        }
        if map.get("status").and_then(Value::as_str) == Some("error") {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{FunctionCall, ToolCall};

    fn assistant_with_call(id: &str, tool_name: &str) -> ChatMessage {
        ChatMessage::Assistant {
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: id.to_string(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: tool_name.to_string(),
                    arguments: "{}".to_string(),
                },
            }]),
        }
    }

    fn tool_msg(id: &str, content: &str) -> ChatMessage {
        ChatMessage::Tool {
            tool_call_id: id.to_string(),
            content: MessageContent::Text(content.to_string()),
        }
    }

    fn user_msg(text: &str) -> ChatMessage {
        ChatMessage::User {
            content: MessageContent::Text(text.to_string()),
        }
    }

    /// S1 — Schema 1 masking turn window = 1.
    #[test]
    fn s1_masking_turn_window_one() {
        let messages = vec![
            ChatMessage::System {
                content: MessageContent::Text("sys".to_string()),
            },
            assistant_with_call("call_1", "fast_read_file"),
            tool_msg("call_1", &"A".repeat(1000)),
            user_msg("go"),
            assistant_with_call("call_2", "fast_read_file"),
            tool_msg("call_2", "OK"),
            user_msg("go again"),
        ];

        let policy = MaskingPolicy {
            window_turns: 1,
            keep_last_k_per_tool: None,
            ..MaskingPolicy::default()
        };

        let masked = mask(&messages, &policy);
        assert_eq!(masked.len(), messages.len());

        let first_tool = masked[2].content_text().unwrap();
        assert!(first_tool.starts_with("[Observation masquée"));
        assert!(first_tool.contains("call_1"));
        assert!(first_tool.contains("fast_read_file"));

        let second_tool = masked[5].content_text().unwrap();
        assert_eq!(second_tool, "OK");
    }

    #[test]
    fn disabled_policy_is_identity() {
        let messages = vec![
            assistant_with_call("call_1", "tool"),
            tool_msg("call_1", &"x".repeat(50)),
        ];
        let policy = MaskingPolicy {
            enabled: false,
            ..MaskingPolicy::default()
        };
        assert_eq!(mask(&messages, &policy), messages);
    }

    #[test]
    fn orphan_tool_call_id_is_untouched() {
        let messages = vec![tool_msg("ghost", &"x".repeat(50))];
        let policy = MaskingPolicy {
            window_turns: 0,
            keep_last_k_per_tool: None,
            ..MaskingPolicy::default()
        };
        let masked = mask(&messages, &policy);
        assert_eq!(masked[0].content_text(), Some("x".repeat(50)).as_deref());
    }

    #[test]
    fn error_like_content_is_kept_when_keep_errors() {
        let messages = vec![
            assistant_with_call("call_1", "tool"),
            tool_msg("call_1", "Traceback (most recent call last): boom"),
        ];
        let policy = MaskingPolicy {
            window_turns: 0,
            keep_last_k_per_tool: None,
            keep_errors: true,
            ..MaskingPolicy::default()
        };
        let masked = mask(&messages, &policy);
        assert_eq!(
            masked[1].content_text(),
            Some("Traceback (most recent call last): boom")
        );
    }

    #[test]
    fn non_string_content_is_untouched() {
        let messages = vec![
            assistant_with_call("call_1", "tool"),
            ChatMessage::Tool {
                tool_call_id: "call_1".to_string(),
                content: MessageContent::Parts(vec![serde_json::json!({"type": "text", "text": "hi"})]),
            },
        ];
        let policy = MaskingPolicy {
            window_turns: 0,
            keep_last_k_per_tool: None,
            ..MaskingPolicy::default()
        };
        let masked = mask(&messages, &policy);
        assert_eq!(masked[1], messages[1]);
    }
}
