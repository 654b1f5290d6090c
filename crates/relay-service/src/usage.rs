//! Usage extraction from SSE/JSON upstream payloads, used by the
//! streaming pipeline (C10) to emit `metric_updated` events without
//! understanding each provider's full response schema.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Scans one already-parsed JSON value (an SSE `data:` frame payload, or a
/// non-streaming response body) for an OpenAI-shaped `usage` object or a
/// Gemini-shaped `usageMetadata` object.
pub fn extract_usage(value: &Value) -> Option<Usage> {
    if let Some(usage) = value.get("usage") {
        return parse_openai_usage(usage);
    }
    if let Some(usage_metadata) = value.get("usageMetadata") {
        return parse_gemini_usage(usage_metadata);
    }
    None
}

fn parse_openai_usage(usage: &Value) -> Option<Usage> {
    let prompt_tokens = usage.get("prompt_tokens")?.as_u64()?;
    let completion_tokens = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
    let total_tokens = usage
        .get("total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(prompt_tokens + completion_tokens);
    Some(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}

fn parse_gemini_usage(usage_metadata: &Value) -> Option<Usage> {
    let prompt_tokens = usage_metadata.get("promptTokenCount")?.as_u64()?;
    let completion_tokens = usage_metadata
        .get("candidatesTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let total_tokens = usage_metadata
        .get("totalTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(prompt_tokens + completion_tokens);
    Some(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}

/// Splits a raw byte buffer into `(complete_sse_frames, remainder)` on
/// `"\n\n"` boundaries, mirroring how the pipeline tees the byte stream
/// while forwarding it downstream unchanged.
pub fn split_sse_frames(buffer: &str) -> (Vec<&str>, &str) {
    let mut frames = Vec::new();
    let mut rest = buffer;
    while let Some(idx) = rest.find("\n\n") {
        frames.push(&rest[..idx]);
        rest = &rest[idx + 2..];
    }
    (frames, rest)
}

/// Extracts the JSON payload from one `data: ...` SSE frame, if present and
/// not the terminal `[DONE]` marker.
pub fn frame_json_payload(frame: &str) -> Option<Value> {
    for line in frame.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if data == "[DONE]" {
                return None;
            }
            return serde_json::from_str(data).ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_openai_shaped_usage() {
        let value = json!({"usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}});
        let usage = extract_usage(&value).unwrap();
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn extracts_gemini_shaped_usage() {
        let value = json!({"usageMetadata": {"promptTokenCount": 8, "candidatesTokenCount": 2, "totalTokenCount": 10}});
        let usage = extract_usage(&value).unwrap();
        assert_eq!(usage.prompt_tokens, 8);
        assert_eq!(usage.total_tokens, 10);
    }

    #[test]
    fn no_usage_returns_none() {
        assert!(extract_usage(&json!({"choices": []})).is_none());
    }

    #[test]
    fn splits_multiple_sse_frames() {
        let buf = "data: {\"a\":1}\n\ndata: {\"a\":2}\n\nrest";
        let (frames, rest) = split_sse_frames(buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(rest, "rest");
    }

    #[test]
    fn done_marker_yields_no_payload() {
        assert!(frame_json_payload("data: [DONE]").is_none());
    }
}
