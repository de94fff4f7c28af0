//! PDA Executor — runs an agent's step program (`prompt`, `agent_ref`,
//! `route`, `loop`, `parallel`) over a stack of [`PdaFrame`]s.
//!
//! Grounded on `runtime::agent::{AgentManager, AgentContext, run_agent}`:
//! the `agent.run` delegation primitive (spawn a child turn, drain its
//! event stream for the final content) is the kernel of the `agent_ref`
//! step below. The teacher has no step program, recursion accounting, or
//! `route`/`loop`/`parallel` steps — those are new, built in the same
//! idiom (a cancel-token-threaded child turn whose final text feeds the
//! next step).

use std::collections::HashMap;
use std::sync::Arc;

use ag_context::ContextBuilder;
use ag_domain::capability::ModelRole;
use ag_domain::config::{AgentConfig, Step};
use ag_domain::event::{Event, PdaFrameSummary, PdaPhase};
use ag_domain::pda::{PdaCheckpoint, PdaFrame};
use ag_domain::tool::{Message, ToolDefinition};
use ag_domain::{Error, Result};
use ag_providers::{ChatRequest, LlmRouter};
use ag_tools::ToolRegistry;
use futures_util::future::{join_all, BoxFuture};

use crate::cancel::CancelToken;
use crate::events::EventBus;
use crate::turn::{TurnOutcome, TurnRunner};

pub struct PdaExecutor {
    turn_runner: Arc<TurnRunner>,
    router: Arc<LlmRouter>,
    registry: Arc<dyn ToolRegistry>,
    agents: Arc<HashMap<String, AgentConfig>>,
    events: EventBus,
    default_max_recursion: u32,
}

impl PdaExecutor {
    pub fn new(
        turn_runner: Arc<TurnRunner>,
        router: Arc<LlmRouter>,
        registry: Arc<dyn ToolRegistry>,
        agents: Arc<HashMap<String, AgentConfig>>,
        events: EventBus,
        default_max_recursion: u32,
    ) -> Self {
        Self { turn_runner, router, registry, agents, events, default_max_recursion }
    }

    fn max_recursion_for(&self, agent_id: &str) -> u32 {
        self.agents.get(agent_id).and_then(|a| a.max_recursion).unwrap_or(self.default_max_recursion)
    }

    /// Tool definitions advertised to the model for `agent_id`, filtered
    /// by that agent's [`ag_domain::config::ToolPolicy`] — the same
    /// allow/deny rules the Tool Dispatcher re-checks before execution.
    fn tool_defs_for(&self, agent_id: &str) -> Vec<ToolDefinition> {
        let policy = self.agents.get(agent_id).map(|a| &a.tool_policy);
        self.registry
            .definitions()
            .into_iter()
            .filter(|def| match policy {
                Some(p) => p.allows(&def.name),
                None => true,
            })
            .collect()
    }

    fn builder_for(&self, agent_id: &str) -> ContextBuilder {
        let prompt = format!("You are the '{agent_id}' agent in a multi-agent program.");
        ContextBuilder::new(prompt, 8_000)
    }

    /// Run `checkpoint`'s program to completion (or until cancellation,
    /// an error, or a recursion/iteration ceiling is hit), seeding the
    /// first step's input with `initial_input`. Returns the final step's
    /// output text.
    pub async fn run(&self, checkpoint: &mut PdaCheckpoint, initial_input: &str, cancel: &CancelToken) -> Result<String> {
        self.run_frame(checkpoint, initial_input.to_string(), cancel).await
    }

    fn run_frame<'a>(
        &'a self,
        checkpoint: &'a mut PdaCheckpoint,
        mut last_output: String,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            loop {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                let agent_id = checkpoint
                    .top()
                    .ok_or_else(|| Error::PdaCheckpointMissing(checkpoint.session_id.clone()))?
                    .agent_id
                    .clone();

                let top = checkpoint.top().ok_or_else(|| Error::PdaCheckpointMissing(checkpoint.session_id.clone()))?;
                if top.is_exhausted() {
                    return Ok(last_output);
                }

                let step = top.current().ok_or_else(|| Error::PdaCheckpointMissing(checkpoint.session_id.clone()))?.clone();
                let step_label = step.label().to_string();
                let depth = checkpoint.depth;
                let step_index = top.cursor;
                let step_total = top.steps.len();
                let executed_steps = top.executed.clone();
                let parent_frames = parent_frame_summaries(checkpoint);

                self.events
                    .send(Event::PdaStepStarted {
                        session_id: checkpoint.session_id.clone(),
                        agent_id: agent_id.clone(),
                        step_label: step_label.clone(),
                        depth,
                        step_index,
                        step_total,
                        phase: PdaPhase::Start,
                        executed_steps: executed_steps.clone(),
                        parent_frames: parent_frames.clone(),
                    })
                    .await;

                match step {
                    Step::Prompt { label: _, content } => {
                        let text = substitute_input(&content, &last_output);
                        match self.run_prompt(checkpoint, &agent_id, &text, cancel).await {
                            Ok(text) => last_output = text,
                            Err(Error::SessionPaused(_)) => {
                                checkpoint.mark_interrupted("paused");
                                return Err(Error::SessionPaused(checkpoint.session_id.clone()));
                            }
                            Err(e) => return Err(e),
                        }
                        checkpoint.top_mut().ok_or_else(|| Error::PdaCheckpointMissing(checkpoint.session_id.clone()))?.advance();
                    }

                    Step::AgentRef { label: _, target } => {
                        last_output = self.descend(checkpoint, &target, last_output, cancel).await?;
                        checkpoint.top_mut().ok_or_else(|| Error::PdaCheckpointMissing(checkpoint.session_id.clone()))?.advance();
                    }

                    Step::Route { label: _, classifier_prompt, branches, default_branch } => {
                        let branch = self.classify(&classifier_prompt, &last_output).await?;
                        let mut target = branches.get(&branch).cloned().unwrap_or_else(|| {
                            branches.get(&default_branch).cloned().unwrap_or_else(|| agent_id.clone())
                        });

                        if target == agent_id {
                            let frame = checkpoint.top_mut().ok_or_else(|| Error::PdaCheckpointMissing(checkpoint.session_id.clone()))?;
                            frame.loop_count += 1;
                            if frame.loop_count > self.max_recursion_for(&agent_id) {
                                target = branches.get(&default_branch).cloned().unwrap_or_else(|| agent_id.clone());
                            }
                        }

                        if target != agent_id {
                            last_output = self.descend(checkpoint, &target, last_output, cancel).await?;
                        }
                        checkpoint.top_mut().ok_or_else(|| Error::PdaCheckpointMissing(checkpoint.session_id.clone()))?.advance();
                    }

                    Step::Loop { label: _, guard_prompt, body, max_iterations } => {
                        let loop_count = checkpoint.top().ok_or_else(|| Error::PdaCheckpointMissing(checkpoint.session_id.clone()))?.loop_count;
                        let should_continue = loop_count < max_iterations && self.guard(&guard_prompt, &last_output).await?;
                        if should_continue {
                            checkpoint.top_mut().ok_or_else(|| Error::PdaCheckpointMissing(checkpoint.session_id.clone()))?.loop_count += 1;
                            if checkpoint.depth + 1 > self.max_recursion_for(&agent_id) {
                                return Err(Error::PdaRecursionLimit(checkpoint.depth + 1));
                            }
                            checkpoint.push_frame(PdaFrame::new(agent_id.clone(), body.clone()));
                            let child_output = self.run_frame(checkpoint, last_output.clone(), cancel).await?;
                            checkpoint.pop_frame();
                            last_output = child_output;
                            // Stay on this step; the guard is re-checked next pass.
                        } else {
                            checkpoint.top_mut().ok_or_else(|| Error::PdaCheckpointMissing(checkpoint.session_id.clone()))?.advance();
                        }
                    }

                    Step::Parallel { label: _, branches } => {
                        let session_id = checkpoint.session_id.clone();
                        let current_depth = checkpoint.depth;
                        let futures = branches.iter().map(|body| {
                            let mut sub = PdaCheckpoint::new(session_id.clone(), agent_id.clone(), body.clone());
                            sub.depth = current_depth;
                            let input = last_output.clone();
                            async move { self.run_frame_owned(sub, input, cancel).await }
                        });
                        let results = join_all(futures).await;
                        let mut joined = String::new();
                        for (idx, result) in results.into_iter().enumerate() {
                            if idx > 0 {
                                joined.push_str("\n---\n");
                            }
                            joined.push_str(&result?);
                        }
                        last_output = joined;
                        checkpoint.top_mut().ok_or_else(|| Error::PdaCheckpointMissing(checkpoint.session_id.clone()))?.advance();
                    }
                }

                if cancel.is_paused() {
                    checkpoint.mark_interrupted("paused");
                }

                self.events
                    .send(Event::PdaStepFinished {
                        session_id: checkpoint.session_id.clone(),
                        agent_id: agent_id.clone(),
                        step_label,
                        depth: checkpoint.depth,
                        step_index,
                        step_total,
                        phase: PdaPhase::Done,
                        executed_steps,
                        parent_frames,
                    })
                    .await;
            }
        })
    }

    /// Owned-checkpoint variant used for `parallel` branches, which each
    /// run against their own, independently-pushed checkpoint.
    fn run_frame_owned<'a>(
        &'a self,
        mut checkpoint: PdaCheckpoint,
        input: String,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { self.run_frame(&mut checkpoint, input, cancel).await })
    }

    async fn descend(&self, checkpoint: &mut PdaCheckpoint, target: &str, input: String, cancel: &CancelToken) -> Result<String> {
        let current_agent = checkpoint.top().ok_or_else(|| Error::PdaCheckpointMissing(checkpoint.session_id.clone()))?.agent_id.clone();
        if checkpoint.depth + 1 > self.max_recursion_for(&current_agent) {
            return Err(Error::PdaRecursionLimit(checkpoint.depth + 1));
        }
        let target_cfg = self.agents.get(target).ok_or_else(|| Error::NotFound(format!("agent '{target}'")))?;
        checkpoint.push_frame(PdaFrame::new(target.to_string(), target_cfg.steps.clone()));
        let output = self.run_frame(checkpoint, input, cancel).await?;
        checkpoint.pop_frame();
        Ok(output)
    }

    async fn run_prompt(&self, checkpoint: &PdaCheckpoint, agent_id: &str, text: &str, cancel: &CancelToken) -> Result<String> {
        let agent_cfg = self.agents.get(agent_id).cloned().unwrap_or_default();
        let mut history: Vec<Message> = Vec::new();
        let tool_defs = self.tool_defs_for(agent_id);
        let builder = self.builder_for(agent_id);
        let outcome = self
            .turn_runner
            .run(
                &checkpoint.session_id,
                &agent_cfg.tool_policy,
                &builder,
                &mut history,
                text,
                &tool_defs,
                cancel,
                None,
                &[],
                None,
            )
            .await?;

        match outcome {
            TurnOutcome::Done { final_text, .. } => Ok(final_text),
            TurnOutcome::Truncated { partial_text, .. } => Ok(partial_text),
            TurnOutcome::Cancelled { .. } => Err(Error::Cancelled),
            TurnOutcome::Paused { .. } => Err(Error::SessionPaused(checkpoint.session_id.clone())),
            TurnOutcome::IterationLimit => Err(Error::IterationLimit(0)),
            TurnOutcome::PolicyCircuitOpen => Err(Error::PolicyCircuitOpen(checkpoint.session_id.clone())),
        }
    }

    /// Run a short classifier prompt and return the model's chosen branch label.
    async fn classify(&self, classifier_prompt: &str, input: &str) -> Result<String> {
        let prompt = format!("{classifier_prompt}\n\nInput:\n{input}\n\nRespond with only the branch label.");
        let response = self
            .router
            .chat_for_role(ModelRole::Planner, ChatRequest { messages: vec![Message::user(prompt)], ..ChatRequest::default() })
            .await?;
        Ok(response.content.trim().to_string())
    }

    /// Run a guard prompt and interpret the model's answer as a boolean:
    /// a response beginning with "y" (case-insensitive) continues the loop.
    async fn guard(&self, guard_prompt: &str, input: &str) -> Result<bool> {
        let prompt = format!("{guard_prompt}\n\nCurrent state:\n{input}\n\nRespond with only yes or no.");
        let response = self
            .router
            .chat_for_role(ModelRole::Planner, ChatRequest { messages: vec![Message::user(prompt)], ..ChatRequest::default() })
            .await?;
        Ok(response.content.trim().to_ascii_lowercase().starts_with('y'))
    }
}

/// Snapshot every frame below the top of the stack, for reporting the
/// full call stack alongside `pda-progress` events.
fn parent_frame_summaries(checkpoint: &PdaCheckpoint) -> Vec<PdaFrameSummary> {
    let frames = &checkpoint.frames;
    if frames.is_empty() {
        return Vec::new();
    }
    frames[..frames.len() - 1]
        .iter()
        .map(|frame| PdaFrameSummary {
            agent_id: frame.agent_id.clone(),
            step_label: frame.current().map(|s| s.label().to_string()).unwrap_or_default(),
            cursor: frame.cursor,
        })
        .collect()
}

fn substitute_input(content: &str, last_output: &str) -> String {
    if content.contains("{input}") {
        content.replace("{input}", last_output)
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_input_replaces_placeholder() {
        assert_eq!(substitute_input("summarize: {input}", "the draft"), "summarize: the draft");
    }

    #[test]
    fn substitute_input_leaves_literal_content_untouched() {
        assert_eq!(substitute_input("start the task", "anything"), "start the task");
    }
}
