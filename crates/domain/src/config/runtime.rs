use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime — knobs for the Agent Loop, PDA executor, and scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tuning for the Agent Loop, PDA executor, event bus, and session
/// scheduler — the knobs named in the runner's configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Cap on model-call iterations per request before the loop gives up.
    #[serde(default = "d_iteration_limit")]
    pub iteration_limit: u32,
    /// Default per-tool execution timeout (seconds), absent a per-tool override.
    #[serde(default = "d_tool_timeout_secs")]
    pub tool_timeout_default_secs: u64,
    /// Max read-only tool calls executed concurrently within one session.
    #[serde(default = "d_tool_parallelism")]
    pub tool_parallelism_per_session: usize,
    /// Bounded capacity of each per-request event channel.
    #[serde(default = "d_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// Emit a heartbeat event after this many seconds of producer silence.
    #[serde(default = "d_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    /// Default time-to-live for a pending approval before it auto-times-out.
    #[serde(default = "d_approval_ttl_secs")]
    pub approval_default_ttl_secs: u64,
    /// Default PDA recursion ceiling, overridable per agent.
    #[serde(default = "d_pda_max_recursion")]
    pub pda_max_recursion_default: u32,
    /// Max iterations of a PDA `loop` step.
    #[serde(default = "d_pda_loop_iterations")]
    pub pda_loop_max_iterations: u32,
    /// Bounded FIFO depth of the per-session admission queue; requests
    /// beyond this are rejected with `session-busy`.
    #[serde(default = "d_session_queue_depth")]
    pub session_queue_depth: usize,
    /// Optional ceiling on concurrently-active sessions across the whole
    /// process. `None` means unbounded admission.
    #[serde(default)]
    pub max_concurrent_sessions: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            iteration_limit: d_iteration_limit(),
            tool_timeout_default_secs: d_tool_timeout_secs(),
            tool_parallelism_per_session: d_tool_parallelism(),
            event_channel_capacity: d_event_channel_capacity(),
            heartbeat_interval_secs: d_heartbeat_secs(),
            approval_default_ttl_secs: d_approval_ttl_secs(),
            pda_max_recursion_default: d_pda_max_recursion(),
            pda_loop_max_iterations: d_pda_loop_iterations(),
            session_queue_depth: d_session_queue_depth(),
            max_concurrent_sessions: None,
        }
    }
}

fn d_iteration_limit() -> u32 {
    40
}
fn d_tool_timeout_secs() -> u64 {
    120
}
fn d_tool_parallelism() -> usize {
    4
}
fn d_event_channel_capacity() -> usize {
    256
}
fn d_heartbeat_secs() -> u64 {
    15
}
fn d_approval_ttl_secs() -> u64 {
    600
}
fn d_pda_max_recursion() -> u32 {
    5
}
fn d_pda_loop_iterations() -> u32 {
    10
}
fn d_session_queue_depth() -> usize {
    8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_configuration_surface() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.iteration_limit, 40);
        assert_eq!(cfg.tool_timeout_default_secs, 120);
        assert_eq!(cfg.tool_parallelism_per_session, 4);
        assert_eq!(cfg.event_channel_capacity, 256);
        assert_eq!(cfg.heartbeat_interval_secs, 15);
        assert_eq!(cfg.approval_default_ttl_secs, 600);
        assert_eq!(cfg.pda_max_recursion_default, 5);
        assert_eq!(cfg.pda_loop_max_iterations, 10);
        assert_eq!(cfg.session_queue_depth, 8);
        assert!(cfg.max_concurrent_sessions.is_none());
    }

    #[test]
    fn deserializes_from_empty_toml() {
        let cfg: RuntimeConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.iteration_limit, 40);
    }
}
