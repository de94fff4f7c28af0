use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::ToolCall;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime event bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events published on a session's event channel.
///
/// Distinct from [`crate::stream::StreamEvent`], which is the
/// provider-level token stream consumed internally by the Agent Loop:
/// `Event` is the runtime-level record a caller subscribes to, one per
/// session, covering the whole turn rather than one model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A model call started.
    IterationStarted { session_id: String, iteration: u32 },
    /// Streamed text delta from the model (content, not reasoning).
    TextDelta { session_id: String, text: String },
    /// The model requested a tool call.
    ToolCallRequested { session_id: String, call: ToolCall },
    /// A tool call finished executing.
    ToolCallFinished {
        session_id: String,
        call_id: String,
        tool_name: String,
        result: Value,
        is_error: bool,
        duration_ms: u64,
    },
    /// A tool call was blocked by the Policy Gate.
    ToolCallBlocked { session_id: String, call_id: String, tool_name: String, reason: String },
    /// A tool call is suspended pending human approval.
    ApprovalRequested { session_id: String, request: ApprovalRequest },
    /// A pending approval was resolved.
    ApprovalResolved { session_id: String, approval_id: String, approved: bool },
    /// A PDA step started execution.
    PdaStepStarted {
        session_id: String,
        agent_id: String,
        step_label: String,
        depth: u32,
        step_index: usize,
        step_total: usize,
        phase: PdaPhase,
        executed_steps: Vec<String>,
        parent_frames: Vec<PdaFrameSummary>,
    },
    /// A PDA step finished execution.
    PdaStepFinished {
        session_id: String,
        agent_id: String,
        step_label: String,
        depth: u32,
        step_index: usize,
        step_total: usize,
        phase: PdaPhase,
        executed_steps: Vec<String>,
        parent_frames: Vec<PdaFrameSummary>,
    },
    /// Context compaction ran for this session.
    ContextCompacted { session_id: String, tokens_before: u32, tokens_after: u32 },
    /// Periodic liveness signal emitted after producer silence.
    Heartbeat { session_id: String, at: DateTime<Utc> },
    /// The session's lifecycle status changed.
    StatusChanged { session_id: String, status: crate::session::SessionStatus },
    /// Terminal error for the session.
    Error { session_id: String, message: String },
    /// Turn finished normally with the final assistant text.
    Done { session_id: String, final_text: String },
}

impl Event {
    pub fn session_id(&self) -> &str {
        match self {
            Event::IterationStarted { session_id, .. }
            | Event::TextDelta { session_id, .. }
            | Event::ToolCallRequested { session_id, .. }
            | Event::ToolCallFinished { session_id, .. }
            | Event::ToolCallBlocked { session_id, .. }
            | Event::ApprovalRequested { session_id, .. }
            | Event::ApprovalResolved { session_id, .. }
            | Event::PdaStepStarted { session_id, .. }
            | Event::PdaStepFinished { session_id, .. }
            | Event::ContextCompacted { session_id, .. }
            | Event::Heartbeat { session_id, .. }
            | Event::StatusChanged { session_id, .. }
            | Event::Error { session_id, .. }
            | Event::Done { session_id, .. } => session_id,
        }
    }
}

/// Where a `pda-progress` event sits in a step's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdaPhase {
    Start,
    Running,
    Done,
}

/// A snapshot of one ancestor frame, reported alongside `pda-progress` so
/// subscribers can render the full call stack without holding the
/// checkpoint themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdaFrameSummary {
    pub agent_id: String,
    pub step_label: String,
    pub cursor: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool call suspended on the Approval Broker, waiting for a human
/// decision before the runtime resumes or abandons it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub session_id: String,
    pub call: ToolCall,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_accessor_covers_all_variants() {
        let ev = Event::Heartbeat { session_id: "s1".into(), at: Utc::now() };
        assert_eq!(ev.session_id(), "s1");
    }

    #[test]
    fn approval_request_expiry() {
        let now = Utc::now();
        let req = ApprovalRequest {
            id: "a1".into(),
            session_id: "s1".into(),
            call: ToolCall { call_id: "c1".into(), tool_name: "exec".into(), arguments: serde_json::json!({}) },
            reason: "dangerous pattern".into(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(10),
        };
        assert!(!req.is_expired(now));
        assert!(req.is_expired(now + chrono::Duration::seconds(11)));
    }
}
