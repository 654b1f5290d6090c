//! Goal-hint derivation (C5.1): a deterministic heuristic over the message
//! array, used to seed the pruner's reranker query. No I/O, no LLM call.

use regex::Regex;

use crate::message::ChatMessage;

#[derive(Debug, Clone)]
pub struct GoalHintConfig {
    pub default_goal_hint: String,
    pub max_lines: usize,
    pub max_chars: usize,
    pub plan_markers: Vec<String>,
}

impl Default for GoalHintConfig {
    fn default() -> Self {
        GoalHintConfig {
            default_goal_hint: "objectif principal".to_string(),
            max_lines: 3,
            max_chars: 280,
            plan_markers: [
                "plan",
                "todo",
                "mission",
                "objectif",
                "objectifs",
                "next step",
                "next steps",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Rules, in order: (1) plan/todo/mission lines, if any; (2) the last
/// non-empty user message; (3) `cfg.default_goal_hint`.
pub fn derive_goal_hint(messages: &[ChatMessage], cfg: &GoalHintConfig) -> String {
    let plan = extract_plan_lines(messages, cfg);
    if !plan.is_empty() {
        return finalize_hint(&plan.join("\n"), cfg);
    }

    if let Some(last_user) = last_user_text(messages) {
        return finalize_hint(last_user, cfg);
    }

    finalize_hint(&cfg.default_goal_hint, cfg)
}

fn extract_plan_lines(messages: &[ChatMessage], cfg: &GoalHintConfig) -> Vec<String> {
    let mut text_blocks = Vec::new();
    for message in messages {
        if !matches!(message.role(), "user" | "assistant" | "system") {
            continue;
        }
        if let Some(text) = message.content_text() {
            if !text.trim().is_empty() {
                text_blocks.push(text.to_string());
            }
        }
    }
    if text_blocks.is_empty() {
        return Vec::new();
    }

    let combined = text_blocks.join("\n");
    let lines: Vec<String> = combined.lines().map(|l| l.trim().to_string()).collect();

    let marker_alt = cfg
        .plan_markers
        .iter()
        .map(|m| regex::escape(m))
        .collect::<Vec<_>>()
        .join("|");
    let marker_re = Regex::new(&format!(
        r"(?i)^\s*(?:{marker_alt})\s*[:\-\x{{2013}}\x{{2014}}]?\s*$"
    ))
    .expect("static marker regex is valid");
    let bullet_re = Regex::new(r"^\s*(?:[-*•]|\d+\.|\d+\))\s+(.*)\s*$")
        .expect("static bullet regex is valid");

    let mut out: Vec<String> = Vec::new();
    let mut in_plan_section = false;

    let max_lines = cfg.max_lines.max(1);

    for line in &lines {
        if line.is_empty() {
            in_plan_section = false;
            continue;
        }

        if marker_re.is_match(line) {
            in_plan_section = true;
            continue;
        }

        if !in_plan_section {
            for marker in &cfg.plan_markers {
                let prefix = format!("{}:", marker.to_lowercase());
                if line.to_lowercase().starts_with(&prefix) {
                    let value = line[prefix.len()..].trim();
                    if !value.is_empty() {
                        out.push(value.to_string());
                    }
                    in_plan_section = true;
                    break;
                }
            }
            if !out.is_empty() {
                continue;
            }
        }

        if in_plan_section {
            if let Some(caps) = bullet_re.captures(line) {
                let item = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                if !item.is_empty() {
                    out.push(item.to_string());
                }
            } else {
                out.push(line.clone());
            }
        }

        if out.len() >= max_lines {
            break;
        }
    }

    let whitespace_re = Regex::new(r"\s+").expect("static whitespace regex is valid");
    let mut cleaned: Vec<String> = Vec::new();
    for line in out {
        let collapsed = whitespace_re.replace_all(&line, " ").trim().to_string();
        if !collapsed.is_empty() && !cleaned.contains(&collapsed) {
            cleaned.push(collapsed);
        }
    }
    cleaned.truncate(max_lines);
    cleaned
}

fn last_user_text(messages: &[ChatMessage]) -> Option<&str> {
    messages.iter().rev().find_map(|message| {
        if message.role() != "user" {
            return None;
        }
        message
            .content_text()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
    })
}

fn finalize_hint(value: &str, cfg: &GoalHintConfig) -> String {
    let whitespace_re = Regex::new(r"\s+").expect("static whitespace regex is valid");
    let cleaned = whitespace_re.replace_all(value, " ").trim().to_string();
    if cleaned.is_empty() {
        return cfg.default_goal_hint.clone();
    }
    if cfg.max_chars > 0 && cleaned.chars().count() > cfg.max_chars {
        return cleaned.chars().take(cfg.max_chars).collect::<String>().trim_end().to_string();
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageContent;

    fn user(text: &str) -> ChatMessage {
        ChatMessage::User {
            content: MessageContent::Text(text.to_string()),
        }
    }

    #[test]
    fn falls_back_to_default_when_no_signal() {
        let cfg = GoalHintConfig::default();
        let hint = derive_goal_hint(&[], &cfg);
        assert_eq!(hint, cfg.default_goal_hint);
    }

    #[test]
    fn uses_last_user_message_when_no_plan() {
        let cfg = GoalHintConfig::default();
        let messages = vec![user("first"), user("fix the flaky retry test")];
        assert_eq!(derive_goal_hint(&messages, &cfg), "fix the flaky retry test");
    }

    #[test]
    fn extracts_bulleted_plan_section() {
        let cfg = GoalHintConfig::default();
        let messages = vec![user("Plan:\n- read the config loader\n- patch the retry path")];
        let hint = derive_goal_hint(&messages, &cfg);
        assert!(hint.contains("read the config loader"));
    }

    #[test]
    fn caps_hint_length_at_max_chars() {
        let cfg = GoalHintConfig {
            max_chars: 10,
            ..GoalHintConfig::default()
        };
        let messages = vec![user("this is definitely longer than ten characters")];
        let hint = derive_goal_hint(&messages, &cfg);
        assert!(hint.chars().count() <= 10);
    }
}
