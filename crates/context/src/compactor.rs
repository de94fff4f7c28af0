use ag_domain::config::CompactionConfig;
use ag_domain::session::CompressedContext;
use ag_domain::tool::{ContentPart, Message, MessageContent, Role};
use ag_domain::Result;
use ag_providers::traits::ChatRequest;
use ag_providers::LlmProvider;

use crate::tokens::estimate_conversation_tokens;

/// Sentinel prefix marking a system message as a compaction summary
/// (rather than an ordinary system prompt), so later compaction runs can
/// find the boundary without a separate out-of-band flag.
const MARKER_PREFIX: &str = "[compaction-summary]";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase 1 — boundary detection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn is_marker(message: &Message) -> bool {
    message.role == Role::System && message.content.extract_all_text().starts_with(MARKER_PREFIX)
}

/// Index of the last compaction marker (inclusive), or 0 if none exists.
pub fn compaction_boundary(messages: &[Message]) -> usize {
    for i in (0..messages.len()).rev() {
        if is_marker(&messages[i]) {
            return i;
        }
    }
    0
}

/// Count user turns since the last compaction marker.
pub fn active_turn_count(messages: &[Message]) -> usize {
    let start = compaction_boundary(messages);
    let active_start = if start > 0 || (!messages.is_empty() && is_marker(&messages[0])) { start + 1 } else { start };
    messages[active_start..].iter().filter(|m| m.role == Role::User).count()
}

/// Whether compaction should run, either because the turn count exceeds
/// `max_turns` or the estimated token budget for the active window is
/// already over the model's usable context.
pub fn should_compact(messages: &[Message], config: &CompactionConfig, context_window_tokens: Option<u32>) -> bool {
    if !config.auto {
        return false;
    }
    if active_turn_count(messages) > config.max_turns {
        return true;
    }
    if let Some(window) = context_window_tokens {
        let start = compaction_boundary(messages);
        let active_start = if start > 0 || (!messages.is_empty() && is_marker(&messages[0])) { start + 1 } else { start };
        let active_tokens = estimate_conversation_tokens(&messages[active_start..]);
        // Leave headroom for the model's own reply.
        return active_tokens > window * 3 / 4;
    }
    false
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase 2 — split compact/keep
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Split the active (post-marker) window into `(to_compact, to_keep)`,
/// where `to_keep` holds the trailing `keep_last_turns` user turns plus
/// any assistant/tool messages that follow them.
pub fn split_for_compaction(messages: &[Message], keep_last_turns: usize) -> (&[Message], &[Message]) {
    let start = compaction_boundary(messages);
    let active_start = if start > 0 || (!messages.is_empty() && is_marker(&messages[0])) { start + 1 } else { start };
    let active = &messages[active_start..];

    let mut user_count = 0;
    let mut keep_from = active.len();
    for (i, message) in active.iter().enumerate().rev() {
        if message.role == Role::User {
            user_count += 1;
            if user_count >= keep_last_turns {
                keep_from = i;
                break;
            }
        }
    }
    if user_count < keep_last_turns {
        keep_from = 0;
    }

    (&active[..keep_from], &active[keep_from..])
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase 3 — summarize
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn render_conversation(messages: &[Message]) -> String {
    let mut buf = String::new();
    for message in messages {
        let label = match message.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
        };
        let text = message.content.extract_all_text();
        buf.push_str(label);
        buf.push_str(": ");
        if text.len() > 2000 {
            buf.push_str(&text[..1000]);
            buf.push_str(" [...] ");
            buf.push_str(&text[text.len() - 500..]);
        } else {
            buf.push_str(&text);
        }
        buf.push('\n');
    }
    buf
}

pub async fn generate_summary(provider: &dyn LlmProvider, to_compact: &[Message]) -> Result<String> {
    let conversation = render_conversation(to_compact);
    let prompt = format!(
        "Summarize the following conversation history into a concise summary that preserves:\n\
         1. The current goal or plan being worked on\n\
         2. Key decisions made\n\
         3. Open questions or threads\n\
         4. Important facts learned along the way\n\
         5. Tool state (running processes, pending work)\n\n\
         Be concise but preserve all actionable context. Write in present tense.\n\n\
         CONVERSATION:\n{conversation}"
    );
    let req = ChatRequest { messages: vec![Message::user(prompt)], max_tokens: Some(2000), temperature: Some(0.1), ..ChatRequest::default() };
    let resp = provider.chat(req).await?;
    Ok(resp.content)
}

/// Build a [`CompressedContext`] from a session's full history: summarize
/// everything before the kept tail via [`generate_summary`], recording the
/// kept messages' ids so the Context Builder can splice them back in.
pub async fn compress_context(
    provider: &dyn LlmProvider,
    messages: &[Message],
    config: &CompactionConfig,
) -> Result<CompressedContext> {
    let (to_compact, to_keep) = split_for_compaction(messages, config.keep_last_turns);
    let summary = generate_summary(provider, to_compact).await?;
    let kept_message_ids = to_keep.iter().map(|m| m.id.clone()).collect();
    let original_tokens = estimate_conversation_tokens(messages);
    let total_tokens = crate::tokens::estimate_tokens(&summary) + estimate_conversation_tokens(to_keep);
    Ok(CompressedContext {
        version: 1,
        summary,
        kept_message_ids,
        total_tokens,
        original_tokens,
        created_at: compressed_context_boundary_time(to_compact, to_keep),
    })
}

/// `created_at` for a compressed context must precede every kept message
/// (so Context Builder's "messages newer than `created_at`" still picks
/// them up via `kept_message_ids`, not by timestamp) while landing after
/// everything just folded into the summary.
fn compressed_context_boundary_time(
    to_compact: &[Message],
    to_keep: &[Message],
) -> chrono::DateTime<chrono::Utc> {
    let after_compacted = to_compact.last().map(|m| m.created_at);
    let before_kept = to_keep.first().map(|m| m.created_at);
    match (after_compacted, before_kept) {
        (_, Some(t)) => t,
        (Some(t), None) => t,
        (None, None) => chrono::Utc::now(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase 4 — splice marker back in
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn marker_message(summary: &str) -> Message {
    Message::system(format!("{MARKER_PREFIX} {summary}"))
}

/// Run the full compaction flow against an in-memory message list: split,
/// summarize, then return the new message list with the compacted span
/// replaced by a single marker message.
pub async fn compact(
    provider: &dyn LlmProvider,
    messages: &[Message],
    config: &CompactionConfig,
) -> Result<Vec<Message>> {
    let boundary = compaction_boundary(messages);
    let prefix_end = if boundary > 0 || (!messages.is_empty() && is_marker(&messages[0])) { boundary + 1 } else { boundary };
    let prefix = &messages[..prefix_end];

    let (to_compact, to_keep) = split_for_compaction(messages, config.keep_last_turns);
    if to_compact.is_empty() {
        return Ok(messages.to_vec());
    }

    let summary = generate_summary(provider, to_compact).await?;
    let mut result = Vec::with_capacity(prefix.len() + 1 + to_keep.len());
    result.extend_from_slice(prefix);
    result.push(marker_message(&summary));
    result.extend_from_slice(to_keep);
    Ok(result)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deterministic budgeting — the Context Builder's final step
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const TOOL_RESULT_CAP_CHARS: usize = 2_000;
const ASSISTANT_CONTENT_CAP_CHARS: usize = 4_000;
const DROPPED_CONTEXT_NOTICE: &str = "[Earlier context dropped \u{2026}]";

/// Fit `messages` within `window_tokens`, applying four phases in order
/// and stopping as soon as the result fits: (1) truncate long tool
/// results, (2) truncate long assistant content, (3) drop oldest
/// user/assistant turns, inserting a single synthetic notice, (4) drop
/// from the front of whatever remains. System messages are hoisted to
/// the front and never dropped. Deterministic: same input, same output.
pub fn budget(messages: &[Message], window_tokens: u32) -> Vec<Message> {
    let (system, rest): (Vec<Message>, Vec<Message>) =
        messages.iter().cloned().partition(|m| m.role == Role::System);
    let sys_tokens = estimate_conversation_tokens(&system);

    let fits = |rest: &[Message]| sys_tokens + estimate_conversation_tokens(rest) <= window_tokens;

    if fits(&rest) {
        return assemble(system, rest);
    }

    let rest = truncate_tool_results(rest, TOOL_RESULT_CAP_CHARS);
    if fits(&rest) {
        return assemble(system, rest);
    }

    let rest = truncate_assistant_content(rest, ASSISTANT_CONTENT_CAP_CHARS);
    if fits(&rest) {
        return assemble(system, rest);
    }

    let budget_for_rest = window_tokens.saturating_sub(sys_tokens);
    let rest = drop_oldest_turns(rest, budget_for_rest);
    if fits(&rest) {
        return assemble(system, rest);
    }

    let rest = drop_from_front(rest, budget_for_rest);
    assemble(system, rest)
}

fn assemble(system: Vec<Message>, rest: Vec<Message>) -> Vec<Message> {
    let mut out = system;
    out.extend(rest);
    out
}

fn truncate_tool_results(messages: Vec<Message>, cap_chars: usize) -> Vec<Message> {
    messages
        .into_iter()
        .map(|mut m| {
            if m.role != Role::Tool {
                return m;
            }
            if let MessageContent::Parts(parts) = &mut m.content {
                for part in parts {
                    if let ContentPart::ToolResult { content, .. } = part {
                        *content = truncate_with_marker(content, cap_chars);
                    }
                }
            }
            m
        })
        .collect()
}

fn truncate_assistant_content(messages: Vec<Message>, cap_chars: usize) -> Vec<Message> {
    messages
        .into_iter()
        .map(|mut m| {
            if m.role != Role::Assistant {
                return m;
            }
            match &mut m.content {
                MessageContent::Text(text) => *text = truncate_with_marker(text, cap_chars),
                MessageContent::Parts(parts) => {
                    for part in parts {
                        if let ContentPart::Text { text } = part {
                            *text = truncate_with_marker(text, cap_chars);
                        }
                    }
                }
            }
            m
        })
        .collect()
}

fn truncate_with_marker(text: &str, cap_chars: usize) -> String {
    if text.chars().count() <= cap_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(cap_chars).collect();
    cut.push_str(" [\u{2026}truncated]");
    cut
}

/// Group `rest` into turns (a leading run of non-user messages, then one
/// run per subsequent `role=user` message and everything up to the next
/// one), then drop the oldest turns one at a time — replacing them with
/// a single synthetic notice — until the remainder fits `budget_tokens`.
fn drop_oldest_turns(rest: Vec<Message>, budget_tokens: u32) -> Vec<Message> {
    let turns = split_into_turns(rest);
    if turns.is_empty() {
        return Vec::new();
    }

    for drop_count in 1..=turns.len() {
        let mut candidate = vec![Message::assistant(DROPPED_CONTEXT_NOTICE)];
        for turn in &turns[drop_count..] {
            candidate.extend(turn.iter().cloned());
        }
        if estimate_conversation_tokens(&candidate) <= budget_tokens || drop_count == turns.len() {
            return candidate;
        }
    }
    unreachable!("loop always returns by drop_count == turns.len()")
}

fn split_into_turns(rest: Vec<Message>) -> Vec<Vec<Message>> {
    let mut turns: Vec<Vec<Message>> = Vec::new();
    for m in rest {
        if m.role == Role::User || turns.is_empty() {
            turns.push(vec![m]);
        } else {
            turns.last_mut().expect("just checked non-empty").push(m);
        }
    }
    turns
}

fn drop_from_front(mut rest: Vec<Message>, budget_tokens: u32) -> Vec<Message> {
    while !rest.is_empty() && estimate_conversation_tokens(&rest) > budget_tokens {
        rest.remove(0);
    }
    rest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max_turns: usize, keep_last_turns: usize) -> CompactionConfig {
        CompactionConfig { auto: true, max_turns, keep_last_turns }
    }

    #[test]
    fn no_marker_boundary_is_zero() {
        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        assert_eq!(compaction_boundary(&messages), 0);
        assert_eq!(active_turn_count(&messages), 1);
    }

    #[test]
    fn boundary_is_after_marker() {
        let messages = vec![
            Message::user("old"),
            Message::assistant("old reply"),
            marker_message("summary of old conversation"),
            Message::user("new"),
        ];
        assert_eq!(compaction_boundary(&messages), 2);
        assert_eq!(active_turn_count(&messages), 1);
    }

    #[test]
    fn should_compact_respects_turn_threshold() {
        let mut messages = Vec::new();
        for i in 0..4 {
            messages.push(Message::user(format!("msg {i}")));
            messages.push(Message::assistant(format!("reply {i}")));
        }
        assert!(should_compact(&messages, &cfg(3, 1), None));
        assert!(!should_compact(&messages, &cfg(10, 1), None));
    }

    #[test]
    fn should_compact_respects_token_budget() {
        let big = Message::user("x".repeat(10_000));
        let messages = vec![big];
        assert!(should_compact(&messages, &cfg(100, 1), Some(100)));
    }

    #[test]
    fn split_keeps_last_n_turns() {
        let mut messages = Vec::new();
        for i in 0..5 {
            messages.push(Message::user(format!("msg {i}")));
            messages.push(Message::assistant(format!("reply {i}")));
        }
        let (to_compact, to_keep) = split_for_compaction(&messages, 2);
        let compact_users: Vec<_> = to_compact.iter().filter(|m| m.role == Role::User).map(|m| m.content.extract_all_text()).collect();
        assert_eq!(compact_users, vec!["msg 0", "msg 1", "msg 2"]);
        let keep_users: Vec<_> = to_keep.iter().filter(|m| m.role == Role::User).map(|m| m.content.extract_all_text()).collect();
        assert_eq!(keep_users, vec!["msg 3", "msg 4"]);
    }

    #[test]
    fn budget_leaves_small_conversations_untouched() {
        let messages = vec![Message::system("sys"), Message::user("hi"), Message::assistant("hello")];
        let out = budget(&messages, 10_000);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn budget_hoists_system_messages_to_the_front() {
        let messages = vec![
            Message::user("msg 0"),
            Message::assistant("reply 0"),
            Message::system("sys"),
            Message::user("msg 1"),
        ];
        let out = budget(&messages, 10_000);
        assert_eq!(out[0].role, Role::System);
    }

    #[test]
    fn budget_truncates_long_tool_results_before_dropping_turns() {
        let mut messages = vec![Message::user("run it")];
        messages.push(Message::tool_result("c1", "x".repeat(5_000)));
        let out = budget(&messages, 600);
        let tool_msg = out.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.extract_all_text().len() < 5_000);
    }

    #[test]
    fn budget_drops_oldest_turns_with_a_single_notice() {
        let mut messages = vec![Message::system("sys")];
        for i in 0..20 {
            messages.push(Message::user(format!("msg {i}")));
            messages.push(Message::assistant(format!("reply {i}")));
        }
        let out = budget(&messages, 80);
        let notices = out.iter().filter(|m| m.content.extract_all_text() == DROPPED_CONTEXT_NOTICE).count();
        assert_eq!(notices, 1);
        // the most recent turn must survive even under a tight budget
        assert!(out.iter().any(|m| m.content.extract_all_text() == "msg 19"));
    }

    #[test]
    fn budget_is_idempotent() {
        let mut messages = vec![Message::system("sys")];
        for i in 0..20 {
            messages.push(Message::user(format!("msg {i}")));
            messages.push(Message::assistant(format!("reply {i}")));
        }
        let once = budget(&messages, 80);
        let twice = budget(&once, 80);
        assert_eq!(once.len(), twice.len());
        let once_text: Vec<_> = once.iter().map(|m| m.content.extract_all_text()).collect();
        let twice_text: Vec<_> = twice.iter().map(|m| m.content.extract_all_text()).collect();
        assert_eq!(once_text, twice_text);
    }

    #[test]
    fn budget_drops_from_front_as_last_resort() {
        let messages = vec![Message::user("only message, quite a bit of unavoidable content here")];
        let out = budget(&messages, 1);
        assert!(out.is_empty());
    }
}
