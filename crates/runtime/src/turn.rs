//! Agent Loop — the turn state machine: build context, call the model,
//! dispatch any requested tools, repeat until a final answer, a length
//! truncation, cancellation, or the iteration limit.
//!
//! Grounded on `runtime::turn::{run_turn, run_turn_inner}`: the bounded
//! tool-call loop, the tool-call-delta assembly, the cancellation checks
//! before each suspension point, and concurrent tool dispatch all carry
//! over, generalised from the teacher's concrete `TurnEvent`/`runs::Run`
//! bookkeeping into the explicit states this loop's [`TurnOutcome`] names.

use std::sync::Arc;
use std::time::Instant;

use ag_context::ContextBuilder;
use ag_domain::capability::ModelRole;
use ag_domain::config::{RuntimeConfig, SkillConfig, ToolPolicy};
use ag_domain::event::Event;
use ag_domain::session::{CompressedContext, SessionStatus};
use ag_domain::stream::Usage;
use ag_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
use ag_domain::Result;
use ag_providers::{ChatRequest, LlmRouter};
use futures_util::future::join_all;
use tokio::sync::Semaphore;

use crate::cancel::CancelToken;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::events::EventBus;

/// Outcome of a single `TurnRunner::run` invocation.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Done { final_text: String, usage: Usage },
    Truncated { partial_text: String, pending_tool_calls: usize },
    IterationLimit,
    Cancelled { partial_text: String },
    /// Suspended ahead of tool invocation because the pause flag was set;
    /// the caller is expected to checkpoint `pending_tool_calls` and
    /// resume later.
    Paused { partial_text: String, pending_tool_calls: Vec<ToolCall> },
    PolicyCircuitOpen,
}

pub struct TurnRunner {
    router: Arc<LlmRouter>,
    dispatcher: Arc<Dispatcher>,
    events: EventBus,
    iteration_limit: u32,
    /// Max read-only tool calls dispatched concurrently within one
    /// session's tool batch (`tool_parallelism_per_session`).
    tool_parallelism: usize,
}

impl TurnRunner {
    pub fn new(router: Arc<LlmRouter>, dispatcher: Arc<Dispatcher>, events: EventBus, config: &RuntimeConfig) -> Self {
        Self {
            router,
            dispatcher,
            events,
            iteration_limit: config.iteration_limit,
            tool_parallelism: config.tool_parallelism_per_session.max(1),
        }
    }

    /// Run one full turn for `session_id`: `history` is the conversation
    /// so far (already compacted/assembled by the caller via
    /// [`ContextBuilder`]); `user_message` is appended before the first
    /// model call. Tool messages accumulate into `history` in place.
    ///
    /// `compressed`, `active_skills`, and `agent_override_prompt` pass
    /// through unchanged to [`ContextBuilder::build`] on every iteration;
    /// a caller with no session-level compaction or skill selection to
    /// report passes `None`/`&[]`/`None`.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        session_id: &str,
        tool_policy: &ToolPolicy,
        context_builder: &ContextBuilder,
        history: &mut Vec<Message>,
        user_message: &str,
        tool_defs: &[ToolDefinition],
        cancel: &CancelToken,
        compressed: Option<&CompressedContext>,
        active_skills: &[SkillConfig],
        agent_override_prompt: Option<&str>,
    ) -> Result<TurnOutcome> {
        history.push(Message::user(user_message));
        let mut total_usage = Usage { prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 };

        for iteration in 1..=self.iteration_limit {
            if cancel.is_cancelled() {
                self.events.send(Event::StatusChanged {
                    session_id: session_id.to_string(),
                    status: ag_domain::session::SessionStatus::Cancelled,
                }).await;
                return Ok(TurnOutcome::Cancelled { partial_text: String::new() });
            }

            self.events.send(Event::IterationStarted { session_id: session_id.to_string(), iteration }).await;

            let (built_messages, _report) =
                context_builder.build(history, tool_defs, compressed, active_skills, agent_override_prompt);
            let req = ChatRequest {
                messages: built_messages,
                tools: tool_defs.to_vec(),
                temperature: Some(0.2),
                max_tokens: None,
                json_mode: false,
                model: None,
            };

            let response = self.router.chat_for_role(ModelRole::Executor, req).await?;

            if !response.content.is_empty() {
                self.events.send(Event::TextDelta { session_id: session_id.to_string(), text: response.content.clone() }).await;
            }
            if let Some(usage) = &response.usage {
                total_usage.prompt_tokens += usage.prompt_tokens;
                total_usage.completion_tokens += usage.completion_tokens;
                total_usage.total_tokens += usage.total_tokens;
            }

            let finish_reason = response.finish_reason.as_deref().unwrap_or("stop");

            if response.tool_calls.is_empty() {
                if finish_reason == "length" {
                    return Ok(TurnOutcome::Truncated { partial_text: response.content, pending_tool_calls: 0 });
                }
                self.events.send(Event::Done { session_id: session_id.to_string(), final_text: response.content.clone() }).await;
                return Ok(TurnOutcome::Done { final_text: response.content, usage: total_usage });
            }

            history.push(assistant_tool_message(&response.content, &response.tool_calls));

            if finish_reason == "length" {
                return Ok(TurnOutcome::Truncated {
                    partial_text: response.content,
                    pending_tool_calls: response.tool_calls.len(),
                });
            }

            if cancel.is_cancelled() {
                return Ok(TurnOutcome::Cancelled { partial_text: response.content });
            }

            if cancel.is_paused() {
                self.events.send(Event::StatusChanged {
                    session_id: session_id.to_string(),
                    status: SessionStatus::Paused,
                }).await;
                return Ok(TurnOutcome::Paused {
                    partial_text: response.content,
                    pending_tool_calls: response.tool_calls,
                });
            }

            for call in &response.tool_calls {
                self.events.send(Event::ToolCallRequested { session_id: session_id.to_string(), call: call.clone() }).await;
            }

            let dispatched = self.dispatch_batch(session_id, tool_policy, &response.tool_calls, cancel).await;

            for (call, outcome, elapsed) in dispatched {
                match outcome? {
                    DispatchOutcome::Completed { result, is_error } => {
                        self.events.send(Event::ToolCallFinished {
                            session_id: session_id.to_string(),
                            call_id: call.call_id.clone(),
                            tool_name: call.tool_name.clone(),
                            result: result.clone(),
                            is_error,
                            duration_ms: elapsed.as_millis() as u64,
                        }).await;
                        history.push(Message::tool_result(&call.call_id, result.to_string()));
                    }
                    DispatchOutcome::Blocked { reason } => {
                        self.events.send(Event::ToolCallBlocked {
                            session_id: session_id.to_string(),
                            call_id: call.call_id.clone(),
                            tool_name: call.tool_name.clone(),
                            reason: reason.clone(),
                        }).await;
                        history.push(Message::tool_result(&call.call_id, format!("blocked by policy: {reason}")));
                    }
                    DispatchOutcome::CircuitOpen => {
                        self.events.send(Event::Error {
                            session_id: session_id.to_string(),
                            message: "policy circuit breaker is open for this session".into(),
                        }).await;
                        return Ok(TurnOutcome::PolicyCircuitOpen);
                    }
                }
            }
        }

        self.events.send(Event::Error {
            session_id: session_id.to_string(),
            message: format!("iteration limit reached ({})", self.iteration_limit),
        }).await;
        Ok(TurnOutcome::IterationLimit)
    }

    /// Dispatch one model turn's tool calls, preserving declaration order
    /// in the result. Contiguous runs of read-only calls (per
    /// [`Dispatcher::is_read_only`]) are dispatched concurrently, bounded
    /// by `tool_parallelism`; a side-effecting call runs alone, with
    /// nothing else in flight, before the next call starts.
    async fn dispatch_batch(
        &self,
        session_id: &str,
        tool_policy: &ToolPolicy,
        calls: &[ToolCall],
        cancel: &CancelToken,
    ) -> Vec<(ToolCall, Result<DispatchOutcome>, std::time::Duration)> {
        let semaphore = Arc::new(Semaphore::new(self.tool_parallelism));
        let mut results = Vec::with_capacity(calls.len());
        let mut i = 0;
        while i < calls.len() {
            if self.dispatcher.is_read_only(&calls[i].tool_name) {
                let start = i;
                while i < calls.len() && self.dispatcher.is_read_only(&calls[i].tool_name) {
                    i += 1;
                }
                let batch = &calls[start..i];
                let batch_results = join_all(batch.iter().map(|call| {
                    let semaphore = semaphore.clone();
                    async move {
                        let _permit = semaphore.acquire().await.expect("semaphore never closed");
                        let started = Instant::now();
                        let outcome = self.dispatcher.dispatch(session_id, tool_policy, call, cancel).await;
                        (call.clone(), outcome, started.elapsed())
                    }
                }))
                .await;
                results.extend(batch_results);
            } else {
                let call = &calls[i];
                let started = Instant::now();
                let outcome = self.dispatcher.dispatch(session_id, tool_policy, call, cancel).await;
                results.push((call.clone(), outcome, started.elapsed()));
                i += 1;
            }
        }
        results
    }
}

/// Build the assistant message recording a model turn's text plus the
/// tool calls it requested, as a single logical write to history.
fn assistant_tool_message(text: &str, tool_calls: &[ToolCall]) -> Message {
    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(ContentPart::Text { text: text.to_string() });
    }
    for call in tool_calls {
        parts.push(ContentPart::ToolUse { id: call.call_id.clone(), name: call.tool_name.clone(), input: call.arguments.clone() });
    }
    let mut msg = Message::assistant(String::new());
    msg.content = MessageContent::Parts(parts);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_tool_message_carries_text_and_calls() {
        let call = ToolCall { call_id: "c1".into(), tool_name: "echo".into(), arguments: serde_json::json!({}) };
        let msg = assistant_tool_message("thinking...", std::slice::from_ref(&call));
        assert_eq!(msg.role, Role::Assistant);
        match msg.content {
            MessageContent::Parts(parts) => assert_eq!(parts.len(), 2),
            _ => panic!("expected parts"),
        }
    }

    #[test]
    fn assistant_tool_message_without_text_omits_text_part() {
        let call = ToolCall { call_id: "c1".into(), tool_name: "echo".into(), arguments: serde_json::json!({}) };
        let msg = assistant_tool_message("", std::slice::from_ref(&call));
        match msg.content {
            MessageContent::Parts(parts) => assert_eq!(parts.len(), 1),
            _ => panic!("expected parts"),
        }
    }
}
