use std::collections::HashMap;

use ag_domain::config::SkillConfig;
use ag_domain::session::CompressedContext;
use ag_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};

use crate::compactor;
use crate::tokens::{estimate_conversation_tokens, estimate_tokens};

/// Assembles the final message list sent to a provider: a layered system
/// prompt (base + active skills + PDA agent override), the compressed
/// context splice if one is on record, and as much of the conversation as
/// fits the target model's context window.
///
/// `tools` is folded into the token budget (providers bill their
/// function-calling schema against the same context window) and is also
/// passed through unchanged to `ChatRequest::tools` by the caller.
pub struct ContextBuilder {
    system_prompt: String,
    budget_tokens: u32,
}

/// Report describing what the builder did, for tracing/observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub total_tokens: u32,
    pub messages_included: usize,
    pub messages_dropped: usize,
    /// Token count of the assembled sequence before `§4.B budget` ran.
    pub pre_budget_tokens: u32,
    /// The assembled sequence before `§4.B budget` ran, so callers can
    /// report both what was composed and what actually fit.
    pub pre_budget: Vec<Message>,
}

impl ContextBuilder {
    pub fn new(system_prompt: impl Into<String>, budget_tokens: u32) -> Self {
        Self { system_prompt: system_prompt.into(), budget_tokens }
    }

    /// Build the message list for one model call.
    ///
    /// * `compressed` — the session's last compaction result, if any.
    /// * `active_skills` — the skills selected for this session; composed
    ///   into the system prompt sorted by ascending priority.
    /// * `agent_override_prompt` — a PDA frame's agent-specific system
    ///   prompt, appended last so it takes precedence in a long context.
    pub fn build(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        compressed: Option<&CompressedContext>,
        active_skills: &[SkillConfig],
        agent_override_prompt: Option<&str>,
    ) -> (Vec<Message>, BuildReport) {
        let spliced = splice_compressed_context(messages, compressed);
        let spliced = drop_leading_orphan_tool_messages(spliced);

        let system = compose_system_message(&self.system_prompt, active_skills, agent_override_prompt);

        let mut pre_budget = Vec::with_capacity(spliced.len() + 1);
        pre_budget.push(system);
        pre_budget.extend(spliced);

        let pre_budget_tokens = estimate_conversation_tokens(&pre_budget);
        let tools_tokens = estimate_tools_tokens(tools);
        let window = self.budget_tokens.saturating_sub(tools_tokens);

        let effective = compactor::budget(&pre_budget, window);

        let report = BuildReport {
            total_tokens: estimate_conversation_tokens(&effective),
            messages_included: effective.len(),
            messages_dropped: pre_budget.len().saturating_sub(effective.len()),
            pre_budget_tokens,
            pre_budget,
        };
        (effective, report)
    }
}

/// §4.C steps 1-3: if a compressed context is on record, prepend the
/// synthetic summary message, then the kept messages in
/// `kept_message_ids` order, then every message strictly newer than the
/// compaction boundary. Otherwise pass the session's messages through
/// unchanged, in chronological order.
fn splice_compressed_context(messages: &[Message], compressed: Option<&CompressedContext>) -> Vec<Message> {
    let Some(compressed) = compressed else {
        return messages.to_vec();
    };

    let by_id: HashMap<&str, &Message> = messages.iter().map(|m| (m.id.as_str(), m)).collect();
    let kept_ids: std::collections::HashSet<&str> =
        compressed.kept_message_ids.iter().map(String::as_str).collect();

    let mut spliced = Vec::with_capacity(compressed.kept_message_ids.len() + messages.len() + 1);
    spliced.push(Message::assistant(format!("[Previous conversation summary]\n{}", compressed.summary)));

    for id in &compressed.kept_message_ids {
        if let Some(message) = by_id.get(id.as_str()) {
            spliced.push((*message).clone());
        }
    }

    for message in messages {
        if message.created_at > compressed.created_at && !kept_ids.contains(message.id.as_str()) {
            spliced.push(message.clone());
        }
    }

    spliced
}

/// §4.C step 4: drop a leading `role=tool` message whose matching
/// assistant `tool_use` id hasn't appeared earlier in the sequence — the
/// splice above can otherwise surface an orphaned tool result whose
/// originating assistant turn fell outside the kept set.
fn drop_leading_orphan_tool_messages(messages: Vec<Message>) -> Vec<Message> {
    let mut seen_tool_use_ids = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        if let MessageContent::Parts(parts) = &message.content {
            for part in parts {
                if let ContentPart::ToolUse { id, .. } = part {
                    seen_tool_use_ids.insert(id.clone());
                }
            }
        }
        if message.role == Role::Tool && !tool_result_ids(&message).iter().all(|id| seen_tool_use_ids.contains(id)) {
            continue;
        }
        out.push(message);
    }
    out
}

fn tool_result_ids(message: &Message) -> Vec<String> {
    match &message.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
                _ => None,
            })
            .collect(),
        MessageContent::Text(_) => Vec::new(),
    }
}

/// §4.C step 5: base system prompt + active skill prompts sorted by
/// ascending priority + PDA agent-override prompt, if present.
fn compose_system_message(
    base: &str,
    active_skills: &[SkillConfig],
    agent_override_prompt: Option<&str>,
) -> Message {
    let mut sorted_skills: Vec<&SkillConfig> = active_skills.iter().collect();
    sorted_skills.sort_by_key(|s| s.priority);

    let mut text = base.to_string();
    for skill in sorted_skills {
        if !skill.system_prompt.is_empty() {
            text.push_str("\n\n");
            text.push_str(&skill.system_prompt);
        }
    }
    if let Some(overlay) = agent_override_prompt {
        if !overlay.is_empty() {
            text.push_str("\n\n");
            text.push_str(overlay);
        }
    }
    Message::system(text)
}

fn estimate_tools_tokens(tools: &[ToolDefinition]) -> u32 {
    tools
        .iter()
        .map(|t| estimate_tokens(&t.name) + estimate_tokens(&t.description) + estimate_tokens(&t.parameters.to_string()))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_everything_under_generous_budget() {
        let builder = ContextBuilder::new("be helpful", 10_000);
        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        let (built, report) = builder.build(&messages, &[], None, &[], None);
        assert_eq!(built.len(), 3); // system + 2
        assert_eq!(report.messages_dropped, 0);
    }

    #[test]
    fn drops_oldest_messages_when_over_budget() {
        let builder = ContextBuilder::new("sys", 30);
        let messages = vec![
            Message::user("a".repeat(200)),
            Message::assistant("b".repeat(200)),
            Message::user("recent"),
        ];
        let (built, report) = builder.build(&messages, &[], None, &[], None);
        assert!(report.messages_dropped > 0);
        assert!(built.last().unwrap().content.extract_all_text().contains("recent"));
    }

    #[test]
    fn system_message_survives_an_impossible_budget() {
        let builder = ContextBuilder::new("sys", 1);
        let messages = vec![Message::user("a".repeat(10_000))];
        let (built, _report) = builder.build(&messages, &[], None, &[], None);
        // the budget can't fit anything, so the oversized user message is
        // dropped entirely, but the system message is never dropped.
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].role, Role::System);
    }

    #[test]
    fn composes_skills_sorted_by_priority_and_agent_override_last() {
        let builder = ContextBuilder::new("base", 10_000);
        let skills = vec![
            SkillConfig { priority: 5, system_prompt: "low prio but first alphabetically".into() },
            SkillConfig { priority: 1, system_prompt: "high priority, goes first".into() },
        ];
        let (built, _report) = builder.build(&[], &[], None, &skills, Some("agent override"));
        let system_text = built[0].content.extract_all_text();
        let high = system_text.find("high priority").unwrap();
        let low = system_text.find("low prio").unwrap();
        let overlay = system_text.find("agent override").unwrap();
        assert!(high < low);
        assert!(low < overlay);
    }

    #[test]
    fn splices_compressed_context_and_drops_orphan_tool_messages() {
        let kept = Message::user("kept message");
        let newer = Message::assistant("newer reply");
        let orphan_tool_result = Message::tool_result("missing-call-id", "leftover output");

        let compressed = CompressedContext {
            version: 1,
            summary: "earlier discussion summarized".into(),
            kept_message_ids: vec![kept.id.clone()],
            total_tokens: 10,
            original_tokens: 1000,
            created_at: kept.created_at,
        };

        let mut messages = vec![orphan_tool_result, kept.clone()];
        messages.push(newer.clone());

        let builder = ContextBuilder::new("sys", 10_000);
        let (built, _report) = builder.build(&messages, &[], Some(&compressed), &[], None);

        let texts: Vec<String> = built.iter().map(|m| m.content.extract_all_text()).collect();
        assert!(texts.iter().any(|t| t.contains("earlier discussion summarized")));
        assert!(texts.iter().any(|t| t == "kept message"));
        assert!(!texts.iter().any(|t| t.contains("leftover output")));
    }

    #[test]
    fn tool_definitions_count_against_the_budget() {
        let builder = ContextBuilder::new("sys", 60);
        let messages = vec![Message::user("hello there, this is a normal length message")];
        let big_tool = ToolDefinition {
            name: "exec".into(),
            description: "x".repeat(500),
            parameters: serde_json::json!({}),
        };
        let (built_without_tools, _) = builder.build(&messages, &[], None, &[], None);
        let (built_with_tools, _) = builder.build(&messages, std::slice::from_ref(&big_tool), None, &[], None);
        assert!(built_with_tools.len() <= built_without_tools.len());
    }
}
