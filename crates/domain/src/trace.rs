use serde::Serialize;

/// Structured trace events emitted across all agent-runner crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    LlmRequest {
        provider: String,
        model: String,
        role: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_provider: String,
        from_model: String,
        to_provider: String,
        to_model: String,
        reason: String,
    },
    ToolDispatched {
        session_id: String,
        tool_name: String,
        call_id: String,
        duration_ms: u64,
        is_error: bool,
    },
    PolicyDecision {
        session_id: String,
        tool_name: String,
        allowed: bool,
        reason: String,
    },
    ApprovalCreated {
        session_id: String,
        approval_id: String,
        tool_name: String,
        ttl_secs: u64,
    },
    SessionAdmitted {
        session_id: String,
        queue_depth_at_admission: usize,
    },
    PdaStep {
        session_id: String,
        agent_id: String,
        step_label: String,
        depth: u32,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "agent_event");
    }
}
