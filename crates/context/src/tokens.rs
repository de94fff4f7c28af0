use ag_domain::tool::Message;

/// Fixed per-message overhead (role marker, separators) added on top of
/// content length when estimating tokens, absent a tokenizer for the
/// target model.
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Rough chars-per-token ratio for English prose, shared by most
/// BPE-style tokenizers closely enough for budget estimation.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of a raw string. Never returns 0 for
/// non-empty input, so a single short message still counts toward budget.
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    ((text.len() + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN).max(1) as u32
}

/// Estimate the token count of one message, including its role overhead.
pub fn estimate_message_tokens(message: &Message) -> u32 {
    estimate_tokens(&message.content.extract_all_text()) + MESSAGE_OVERHEAD_TOKENS
}

/// Estimate the total token count of a conversation.
pub fn estimate_conversation_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn short_text_is_at_least_one_token() {
        assert_eq!(estimate_tokens("hi"), 1);
    }

    #[test]
    fn longer_text_scales_with_length() {
        let text = "a".repeat(400);
        assert_eq!(estimate_tokens(&text), 100);
    }

    #[test]
    fn conversation_sums_per_message_overhead() {
        let messages = vec![Message::user("hi"), Message::assistant("hello there")];
        let total = estimate_conversation_tokens(&messages);
        let expected = estimate_message_tokens(&messages[0]) + estimate_message_tokens(&messages[1]);
        assert_eq!(total, expected);
    }
}
