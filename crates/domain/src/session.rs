use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pda::PdaCheckpoint;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compressed Context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A compaction result that replaces every message older than
/// `created_at` except those listed in `kept_message_ids`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedContext {
    pub version: u32,
    pub summary: String,
    pub kept_message_ids: Vec<String>,
    pub total_tokens: u32,
    pub original_tokens: u32,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of one session as tracked by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting in the admission queue; no turn has started yet.
    Queued,
    /// Currently holding the run lock and executing a turn.
    Running,
    /// Suspended on a tool call awaiting human approval.
    AwaitingApproval,
    /// Suspended by the pause flag ahead of the next tool invocation.
    Paused,
    /// Finished normally.
    Completed,
    /// Finished because a limit (iteration, recursion, duration) was hit.
    Aborted,
    /// Finished because the caller cancelled the session.
    Cancelled,
}

/// A single top-level conversation or sub-agent run tracked by the runtime.
///
/// A root session has `parent_session_id: None` and `depth: 0`. Each
/// `agent_ref` step or `agent.run` tool call spawns a child session whose
/// `depth` is the parent's plus one, enforced against
/// [`crate::config::AgentLimits::max_depth`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub parent_session_id: Option<String>,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub iteration_count: u32,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    /// Set before the next tool invocation; checked once per iteration
    /// by the agent loop, which suspends and checkpoints when it sees it.
    #[serde(default)]
    pub pause: bool,
    /// Idempotent cancel signal, mirrored from the runtime's `CancelToken`
    /// for persistence and cross-process visibility.
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub pda_checkpoint: Option<PdaCheckpoint>,
    #[serde(default)]
    pub compressed_context: Option<CompressedContext>,
    /// Skill ids active for this session. Empty means every configured
    /// skill is enabled.
    #[serde(default)]
    pub selected_skill_ids: Vec<String>,
}

impl Session {
    /// Start a new root session for `agent_id`.
    pub fn new_root(agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            status: SessionStatus::Queued,
            created_at: now,
            updated_at: now,
            parent_session_id: None,
            depth: 0,
            iteration_count: 0,
            input_tokens: 0,
            output_tokens: 0,
            pause: false,
            cancel_requested: false,
            pda_checkpoint: None,
            compressed_context: None,
            selected_skill_ids: Vec::new(),
        }
    }

    /// Spawn a child session one level deeper than `self`.
    pub fn spawn_child(&self, agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            status: SessionStatus::Queued,
            created_at: now,
            updated_at: now,
            parent_session_id: Some(self.id.clone()),
            depth: self.depth + 1,
            iteration_count: 0,
            input_tokens: 0,
            output_tokens: 0,
            pause: false,
            cancel_requested: false,
            pda_checkpoint: None,
            compressed_context: None,
            selected_skill_ids: self.selected_skill_ids.clone(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn record_usage(&mut self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.touch();
    }

    /// Request that the agent loop suspend ahead of its next tool call.
    pub fn request_pause(&mut self) {
        self.pause = true;
        self.touch();
    }

    /// Clear the pause flag and drop the `Paused` status, leaving the
    /// session ready to resume from its checkpoint.
    pub fn resume(&mut self) {
        self.pause = false;
        if self.status == SessionStatus::Paused {
            self.status = SessionStatus::Running;
        }
        self.touch();
    }

    pub fn request_cancel(&mut self) {
        self.cancel_requested = true;
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_session_depth_increments() {
        let root = Session::new_root("master");
        assert_eq!(root.depth, 0);
        let child = root.spawn_child("writer");
        assert_eq!(child.depth, 1);
        assert_eq!(child.parent_session_id, Some(root.id));
    }

    #[test]
    fn record_usage_accumulates() {
        let mut s = Session::new_root("master");
        s.record_usage(10, 20);
        s.record_usage(5, 7);
        assert_eq!(s.input_tokens, 15);
        assert_eq!(s.output_tokens, 27);
    }
}
