//! Approximate, deterministic token counting for dashboard/UX display.
//! Never panics; empty input counts to zero. Not used for billing.

use crate::message::ChatMessage;

/// ~4 chars/token is a common rough estimate across tokenizers; cheap and
/// stable enough for a live token/cost display.
const CHARS_PER_TOKEN: usize = 4;

/// Fixed per-message framing overhead (role tag, separators) mirrored from
/// common chat-format token accounting.
const PER_MESSAGE_OVERHEAD: usize = 3;

pub fn count_text(s: &str) -> usize {
    if s.is_empty() {
        return 0;
    }
    s.chars().count().div_ceil(CHARS_PER_TOKEN)
}

fn message_char_len(message: &ChatMessage) -> usize {
    match message {
        ChatMessage::System { content } | ChatMessage::User { content } => content.char_len(),
        ChatMessage::Assistant {
            content,
            tool_calls,
        } => {
            let content_len = content.as_ref().map(|c| c.char_len()).unwrap_or(0);
            let tool_len: usize = tool_calls
                .iter()
                .flatten()
                .map(|tc| tc.function.name.chars().count() + tc.function.arguments.chars().count())
                .sum();
            content_len + tool_len
        }
        ChatMessage::Tool { content, .. } => content.char_len(),
        ChatMessage::Raw { raw, .. } => raw
            .content
            .as_ref()
            .map(|c| c.char_len())
            .unwrap_or(0),
    }
}

pub fn count_chat(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|m| PER_MESSAGE_OVERHEAD + count_text(&"x".repeat(message_char_len(m))))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageContent;

    #[test]
    fn empty_text_counts_zero() {
        assert_eq!(count_text(""), 0);
    }

    #[test]
    fn text_counts_roughly_four_chars_per_token() {
        assert_eq!(count_text("abcd"), 1);
        assert_eq!(count_text("abcde"), 2);
    }

    #[test]
    fn empty_chat_counts_zero() {
        assert_eq!(count_chat(&[]), 0);
    }

    #[test]
    fn chat_adds_per_message_overhead() {
        let messages = vec![ChatMessage::User {
            content: MessageContent::Text(String::new()),
        }];
        assert_eq!(count_chat(&messages), PER_MESSAGE_OVERHEAD);
    }
}
