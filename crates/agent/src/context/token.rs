//! Token counting.
//!
//! Provider-reported usage is authoritative when present. Everything the
//! provider has not seen yet is estimated at ~4 characters per token,
//! which is within ~10% for BPE tokenizers on English text.

use helmsman_core::message::{Message, Role};

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message from its payload size.
pub fn estimate_message_tokens(message: &Message) -> usize {
    message.char_len().div_ceil(4)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Tokens the conversation occupies in the context window.
///
/// Uses the usage reported on the most recent assistant message and adds an
/// estimate for the messages appended after it. Falls back to a pure
/// estimate when no message carries usage (fresh or just-compressed
/// conversations).
pub fn count_tokens(messages: &[Message]) -> u64 {
    let anchor = messages
        .iter()
        .rposition(|m| m.role == Role::Assistant && m.usage.is_some());

    match anchor {
        Some(idx) => {
            let reported = messages[idx].usage.as_ref().map(|u| u.context_tokens()).unwrap_or(0);
            reported + estimate_messages_tokens(&messages[idx + 1..]) as u64
        }
        None => estimate_messages_tokens(messages) as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_core::provider::Usage;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("test"), 1);
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn multiple_messages() {
        let msgs = vec![Message::user("hello"), Message::assistant("world")];
        assert_eq!(estimate_messages_tokens(&msgs), 4);
    }

    #[test]
    fn usage_anchors_the_count() {
        let mut reply = Message::assistant("done");
        reply.usage = Some(Usage {
            cache_read_tokens: 500,
            ..Usage::new(1000, 200)
        });
        let msgs = vec![Message::user("a".repeat(4000)), reply, Message::user("12345678")];
        assert_eq!(count_tokens(&msgs), 1700 + 2);
    }

    #[test]
    fn falls_back_to_estimate() {
        let msgs = vec![Message::user("a".repeat(40)), Message::assistant("b".repeat(40))];
        assert_eq!(count_tokens(&msgs), 20);
    }
}
