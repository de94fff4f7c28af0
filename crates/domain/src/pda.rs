use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Step;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PDA executor frame stack
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One stack frame of the PDA executor: the step program being run for
/// one agent invocation, and a cursor into it.
///
/// A `loop` step re-enters its own `body` as a fresh frame pushed on top;
/// popping back increments `loop_count` on the parent frame until
/// `max_iterations` or the guard prompt returns false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdaFrame {
    pub agent_id: String,
    pub steps: Vec<Step>,
    /// Index into `steps` of the step about to run.
    pub cursor: usize,
    /// Number of times the current step (a `loop`) has run its body, reset
    /// when the cursor advances past it.
    pub loop_count: u32,
    /// Labels of steps already run in this frame, oldest first — used by
    /// `resume` to pick up after the last completed step and reported in
    /// `pda-progress` events.
    #[serde(default)]
    pub executed: Vec<String>,
}

impl PdaFrame {
    pub fn new(agent_id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self { agent_id: agent_id.into(), steps, cursor: 0, loop_count: 0, executed: Vec::new() }
    }

    /// The step the cursor currently points at, or `None` if the frame is exhausted.
    pub fn current(&self) -> Option<&Step> {
        self.steps.get(self.cursor)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    pub fn advance(&mut self) {
        if let Some(step) = self.current() {
            self.executed.push(step.label().to_string());
        }
        self.cursor += 1;
        self.loop_count = 0;
    }
}

/// A persisted snapshot of a session's frame stack, depth, and the
/// iteration budget consumed so far — enough to resume a suspended PDA
/// run (e.g. after an approval wait) without re-running earlier steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdaCheckpoint {
    pub session_id: String,
    pub frames: Vec<PdaFrame>,
    pub depth: u32,
    pub iterations_consumed: u32,
    /// The prompt the root frame was seeded with, kept so `resume` can
    /// rebuild accumulated content from persisted messages.
    #[serde(default)]
    pub initial_prompt: String,
    /// Filled on pause, cancel, or an interrupt-class error; cleared on
    /// resume. Empty while the program is actively running.
    #[serde(default)]
    pub interrupt_reason: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl PdaCheckpoint {
    pub fn new(session_id: impl Into<String>, root_agent_id: impl Into<String>, root_steps: Vec<Step>) -> Self {
        Self {
            session_id: session_id.into(),
            frames: vec![PdaFrame::new(root_agent_id, root_steps)],
            depth: 0,
            iterations_consumed: 0,
            initial_prompt: String::new(),
            interrupt_reason: None,
            created_at: Utc::now(),
        }
    }

    /// Record the prompt the root frame was seeded with.
    pub fn with_initial_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.initial_prompt = prompt.into();
        self
    }

    pub fn mark_interrupted(&mut self, reason: impl Into<String>) {
        self.interrupt_reason = Some(reason.into());
    }

    pub fn clear_interrupt(&mut self) {
        self.interrupt_reason = None;
    }

    pub fn top(&self) -> Option<&PdaFrame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut PdaFrame> {
        self.frames.last_mut()
    }

    pub fn push_frame(&mut self, frame: PdaFrame) {
        self.depth += 1;
        self.frames.push(frame);
    }

    /// Pop the current frame, returning it, once exhausted.
    pub fn pop_frame(&mut self) -> Option<PdaFrame> {
        let frame = self.frames.pop();
        if frame.is_some() && self.depth > 0 {
            self.depth -= 1;
        }
        frame
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn prompt(label: &str) -> Step {
        Step::Prompt { label: label.into(), content: "go".into() }
    }

    #[test]
    fn frame_advances_and_exhausts() {
        let mut frame = PdaFrame::new("master", vec![prompt("a"), prompt("b")]);
        assert_eq!(frame.current().map(Step::label), Some("a"));
        frame.advance();
        assert_eq!(frame.current().map(Step::label), Some("b"));
        assert!(!frame.is_exhausted());
        frame.advance();
        assert!(frame.is_exhausted());
        assert!(frame.current().is_none());
    }

    #[test]
    fn checkpoint_push_pop_tracks_depth() {
        let mut cp = PdaCheckpoint::new("s1", "master", vec![prompt("a")]);
        assert_eq!(cp.depth, 0);
        cp.push_frame(PdaFrame::new("writer", vec![prompt("x")]));
        assert_eq!(cp.depth, 1);
        assert_eq!(cp.top().unwrap().agent_id, "writer");
        let popped = cp.pop_frame().unwrap();
        assert_eq!(popped.agent_id, "writer");
        assert_eq!(cp.depth, 0);
    }

    #[test]
    fn route_branches_are_preserved_in_frame() {
        let mut branches = HashMap::new();
        branches.insert("yes".to_string(), "writer".to_string());
        let step = Step::Route {
            label: "pick".into(),
            classifier_prompt: "?".into(),
            branches,
            default_branch: "_default".into(),
        };
        let frame = PdaFrame::new("master", vec![step]);
        assert_eq!(frame.current().unwrap().label(), "pick");
    }
}
