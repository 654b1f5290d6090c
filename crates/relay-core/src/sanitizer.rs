//! Tool-call ID sanitizer (C15): validates/repairs `tool_call.id` and
//! malformed `function.arguments` JSON on the wire.

use std::collections::HashMap;
use std::time::Instant;

use rand::Rng;
use regex::Regex;
use serde_json::Value;

use crate::message::{ChatMessage, FunctionCall, ToolCall};

const ID_LEN: usize = 9;
const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub fn generate_tool_call_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

pub fn validate_tool_call_id(id: &str) -> bool {
    id.chars().count() == ID_LEN && id.chars().all(|c| c.is_ascii_alphanumeric())
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub max_total_attempts: u32,
    pub max_time_ms: u64,
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            max_total_attempts: 10,
            max_time_ms: 100,
            enabled: true,
        }
    }
}

/// Caps the total work spent repairing malformed JSON across a whole
/// sanitize pass, not just a single call.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    total_attempts: u32,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            config,
            total_attempts: 0,
        }
    }

    fn allow(&mut self) -> bool {
        if !self.config.enabled {
            return true;
        }
        self.total_attempts += 1;
        self.total_attempts <= self.config.max_total_attempts
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        CircuitBreaker::new(CircuitBreakerConfig::default())
    }
}

/// Validates every assistant `tool_call.id` and every `role=tool`
/// `tool_call_id`, regenerating invalid ones and rewriting the paired id in
/// lock-step; also best-effort repairs malformed `function.arguments`.
pub fn sanitize_messages(messages: &[ChatMessage], breaker: &mut CircuitBreaker) -> Vec<ChatMessage> {
    let mut id_remap: HashMap<String, String> = HashMap::new();
    let mut out: Vec<ChatMessage> = Vec::with_capacity(messages.len());

    for message in messages {
        match message {
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                let new_calls = tool_calls.as_ref().map(|calls| {
                    calls
                        .iter()
                        .map(|call| sanitize_one_call(call, &mut id_remap, breaker))
                        .collect()
                });
                out.push(ChatMessage::Assistant {
                    content: content.clone(),
                    tool_calls: new_calls,
                });
            }
            other => out.push(other.clone()),
        }
    }

    for message in out.iter_mut() {
        if let ChatMessage::Tool { tool_call_id, .. } = message {
            if let Some(new_id) = id_remap.get(tool_call_id) {
                *tool_call_id = new_id.clone();
            } else if !validate_tool_call_id(tool_call_id) {
                *tool_call_id = generate_tool_call_id();
            }
        }
    }

    out
}

fn sanitize_one_call(
    call: &ToolCall,
    id_remap: &mut HashMap<String, String>,
    breaker: &mut CircuitBreaker,
) -> ToolCall {
    let id = if validate_tool_call_id(&call.id) {
        call.id.clone()
    } else {
        let new_id = generate_tool_call_id();
        id_remap.insert(call.id.clone(), new_id.clone());
        new_id
    };

    let arguments = repair_arguments_if_needed(&call.function.arguments, breaker);

    ToolCall {
        id,
        kind: call.kind.clone(),
        function: FunctionCall {
            name: call.function.name.clone(),
            arguments,
        },
    }
}

fn repair_arguments_if_needed(arguments: &str, breaker: &mut CircuitBreaker) -> String {
    if arguments.trim().is_empty() {
        return arguments.to_string();
    }
    if serde_json::from_str::<Value>(arguments).is_ok() {
        return arguments.to_string();
    }
    fix_malformed_json_arguments(arguments, breaker)
}

/// Fixed ordered pipeline of deterministic string fixes; the first one that
/// yields valid JSON wins. Bounded by a circuit breaker on total attempts
/// and elapsed time; on trip or exhaustion the original string is returned.
fn fix_malformed_json_arguments(input: &str, breaker: &mut CircuitBreaker) -> String {
    if !breaker.allow() {
        return input.to_string();
    }

    let started = Instant::now();
    let over_budget = |started: Instant| {
        breaker.config.enabled && started.elapsed().as_millis() as u64 > breaker.config.max_time_ms
    };

    let merged = detect_and_merge_concatenated_json(input);
    if merged != input && serde_json::from_str::<Value>(&merged).is_ok() {
        return merged;
    }

    if over_budget(started) {
        return input.to_string();
    }

    let mut fixed = merged;
    fixed = fixed.replace(",}", "}").replace(",]", "]");
    fixed = insert_missing_commas(&fixed);

    if over_budget(started) {
        return input.to_string();
    }

    if serde_json::from_str::<Value>(&fixed).is_ok() {
        return fixed;
    }

    let balanced = balance_brackets(&fixed);
    if serde_json::from_str::<Value>(&balanced).is_ok() {
        return balanced;
    }

    input.to_string()
}

/// Merges structures like `{"a": 1}{"b": 2}` into `{"a": 1, "b": 2}` by
/// extracting every balanced top-level `{...}` span and shallow-merging the
/// ones that parse (later keys win).
fn detect_and_merge_concatenated_json(input: &str) -> String {
    if input.len() < 4 {
        return input.to_string();
    }

    let concatenation_re = Regex::new(r"\}\s*\{").expect("static regex is valid");
    if !concatenation_re.is_match(input) {
        return input.to_string();
    }

    let mut objects: Vec<Value> = Vec::new();
    let mut depth = 0i32;
    let mut start: Option<usize> = None;

    for (i, ch) in input.char_indices() {
        match ch {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        let candidate = &input[s..=i];
                        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                            objects.push(value);
                        }
                    }
                    start = None;
                }
            }
            _ => {}
        }
    }

    if objects.len() > 1 {
        let mut merged = serde_json::Map::new();
        for object in &objects {
            if let Value::Object(map) = object {
                for (k, v) in map {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        if !merged.is_empty() {
            return Value::Object(merged).to_string();
        }
    }

    input.to_string()
}

/// Inserts a comma between a value and the next `"key":` that immediately
/// follows it with no separator — the most common malformed-arguments
/// shape observed on the wire.
fn insert_missing_commas(input: &str) -> String {
    let after_string =
        Regex::new(r#"("[^"\\]*(?:\\.[^"\\]*)*")\s*("\w+"\s*:)"#).expect("static regex is valid");
    let after_scalar = Regex::new(r#"(\btrue\b|\bfalse\b|\bnull\b|-?\d+(?:\.\d+)?)\s*("\w+"\s*:)"#)
        .expect("static regex is valid");

    let step1 = after_string.replace_all(input, "$1, $2").to_string();
    after_scalar.replace_all(&step1, "$1, $2").to_string()
}

/// Closes an unterminated trailing string and appends closers for any
/// `{`/`[` left open, outside of string content.
fn balance_brackets(input: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for ch in input.chars() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = input.to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageContent;

    fn assistant(id: &str, arguments: &str) -> ChatMessage {
        ChatMessage::Assistant {
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: id.to_string(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: "read_file".to_string(),
                    arguments: arguments.to_string(),
                },
            }]),
        }
    }

    fn tool(id: &str) -> ChatMessage {
        ChatMessage::Tool {
            tool_call_id: id.to_string(),
            content: MessageContent::Text("ok".to_string()),
        }
    }

    #[test]
    fn generated_ids_are_valid() {
        for _ in 0..50 {
            assert!(validate_tool_call_id(&generate_tool_call_id()));
        }
    }

    #[test]
    fn valid_id_is_untouched() {
        let messages = vec![assistant("abcDEF123", r#"{"path":"a.rs"}"#), tool("abcDEF123")];
        let mut breaker = CircuitBreaker::default();
        let sanitized = sanitize_messages(&messages, &mut breaker);
        assert_eq!(sanitized, messages);
    }

    #[test]
    fn invalid_id_is_regenerated_and_paired_id_follows() {
        let messages = vec![assistant("bad", r#"{"path":"a.rs"}"#), tool("bad")];
        let mut breaker = CircuitBreaker::default();
        let sanitized = sanitize_messages(&messages, &mut breaker);

        let new_id = match &sanitized[0] {
            ChatMessage::Assistant { tool_calls, .. } => {
                tool_calls.as_ref().unwrap()[0].id.clone()
            }
            _ => panic!("expected assistant message"),
        };
        assert!(validate_tool_call_id(&new_id));
        assert_ne!(new_id, "bad");

        match &sanitized[1] {
            ChatMessage::Tool { tool_call_id, .. } => assert_eq!(tool_call_id, &new_id),
            _ => panic!("expected tool message"),
        }
    }

    #[test]
    fn repairs_concatenated_json_objects() {
        let mut breaker = CircuitBreaker::default();
        let messages = vec![assistant("abcDEF123", r#"{"a":1}{"b":2}"#)];
        let sanitized = sanitize_messages(&messages, &mut breaker);
        let args = match &sanitized[0] {
            ChatMessage::Assistant { tool_calls, .. } => {
                tool_calls.as_ref().unwrap()[0].function.arguments.clone()
            }
            _ => panic!("expected assistant message"),
        };
        let parsed: Value = serde_json::from_str(&args).unwrap();
        assert_eq!(parsed["a"], 1);
        assert_eq!(parsed["b"], 2);
    }

    #[test]
    fn repairs_missing_comma_between_properties() {
        let mut breaker = CircuitBreaker::default();
        let broken = r#"{"a": "x" "b": 2}"#;
        let fixed = fix_malformed_json_arguments(broken, &mut breaker);
        assert!(serde_json::from_str::<Value>(&fixed).is_ok());
    }

    #[test]
    fn trims_trailing_comma() {
        let mut breaker = CircuitBreaker::default();
        let broken = r#"{"a": 1,}"#;
        let fixed = fix_malformed_json_arguments(broken, &mut breaker);
        assert_eq!(fixed, r#"{"a": 1}"#);
    }

    #[test]
    fn unrepairable_json_is_returned_unchanged() {
        let mut breaker = CircuitBreaker::default();
        let broken = "not json at all and no braces";
        let fixed = fix_malformed_json_arguments(broken, &mut breaker);
        assert_eq!(fixed, broken);
    }

    #[test]
    fn circuit_breaker_trips_after_max_attempts() {
        let config = CircuitBreakerConfig {
            max_total_attempts: 1,
            ..CircuitBreakerConfig::default()
        };
        let mut breaker = CircuitBreaker::new(config);
        let broken = r#"{"a": 1,}"#;
        assert_ne!(fix_malformed_json_arguments(broken, &mut breaker), broken);
        // Second call trips the breaker: original is returned unchanged.
        assert_eq!(fix_malformed_json_arguments(broken, &mut breaker), broken);
    }
}
