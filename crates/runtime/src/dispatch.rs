//! Tool Dispatcher — the single seam a tool call passes through between
//! the Agent Loop and an actual tool implementation: agent-local policy,
//! the global Policy Gate, the Approval Broker, and finally the
//! [`ag_tools::ToolRegistry`].

use std::sync::Arc;
use std::time::Duration;

use ag_domain::config::ToolPolicy;
use ag_domain::tool::ToolCall;
use ag_domain::{Error, Result};
use ag_policy::{CircuitBreaker, PolicyDecision, PolicyGate};
use ag_tools::ToolRegistry;
use serde_json::{json, Value};

use crate::approval::{ApprovalBroker, ApprovalDecision};
use crate::cancel::CancelToken;

/// What happened to one dispatched tool call.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Completed { result: Value, is_error: bool },
    Blocked { reason: String },
    CircuitOpen,
}

/// Tool output strings past this size are truncated with a tail marker
/// before they reach the model.
const MAX_OUTPUT_BYTES: usize = 16_384;
const TRUNCATION_MARKER: &str = "\n…[output truncated]";

pub struct Dispatcher {
    registry: Arc<dyn ToolRegistry>,
    policy: Arc<PolicyGate>,
    circuit: Arc<CircuitBreaker>,
    approvals: Arc<ApprovalBroker>,
    tool_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn ToolRegistry>,
        policy: Arc<PolicyGate>,
        circuit: Arc<CircuitBreaker>,
        approvals: Arc<ApprovalBroker>,
        tool_timeout: Duration,
    ) -> Self {
        Self { registry, policy, circuit, approvals, tool_timeout }
    }

    /// Dispatch one tool call for `session_id`, subject to the agent's own
    /// `tool_policy` (evaluated before the global Policy Gate, mirroring
    /// the deny-precedence `ToolPolicy::allows` check) and the circuit
    /// breaker tripped by repeated blocks in this session.
    pub async fn dispatch(
        &self,
        session_id: &str,
        agent_tool_policy: &ToolPolicy,
        call: &ToolCall,
        cancel: &CancelToken,
    ) -> Result<DispatchOutcome> {
        if self.circuit.is_tripped(session_id) {
            return Ok(DispatchOutcome::CircuitOpen);
        }

        if !agent_tool_policy.allows(&call.tool_name) {
            self.circuit.record_block(session_id);
            return Ok(DispatchOutcome::Blocked {
                reason: format!("tool \"{}\" is not permitted for this agent", call.tool_name),
            });
        }

        match self.policy.evaluate(&call.tool_name, &call.arguments) {
            PolicyDecision::Deny { reason } => {
                self.circuit.record_block(session_id);
                Ok(DispatchOutcome::Blocked { reason })
            }
            PolicyDecision::RequireApproval { reason } => {
                let (request, rx) = self.approvals.create(session_id, call.clone(), reason, None);
                match self.approvals.wait(&request.id, rx, cancel).await {
                    ApprovalDecision::Approved => {
                        self.circuit.record_allow(session_id);
                        self.execute(call).await
                    }
                    ApprovalDecision::Denied => {
                        self.circuit.record_block(session_id);
                        Ok(DispatchOutcome::Blocked { reason: "approval was denied or timed out".into() })
                    }
                }
            }
            PolicyDecision::Allow => {
                self.circuit.record_allow(session_id);
                self.execute(call).await
            }
        }
    }

    async fn execute(&self, call: &ToolCall) -> Result<DispatchOutcome> {
        let tool = self
            .registry
            .get(&call.tool_name)
            .ok_or_else(|| Error::ToolMissing(call.tool_name.clone()))?;

        match tokio::time::timeout(self.tool_timeout, tool.call(call.arguments.clone())).await {
            Ok(Ok(result)) => {
                let result = truncate_value(self.policy.scrub_value(result), MAX_OUTPUT_BYTES);
                Ok(DispatchOutcome::Completed { result, is_error: false })
            }
            Ok(Err(e)) => Ok(DispatchOutcome::Completed { result: json!({ "error": e.to_string() }), is_error: true }),
            Err(_) => Err(Error::ToolTimeout(call.tool_name.clone())),
        }
    }

    /// Whether `tool_name` is read-only, for the per-session parallelism
    /// limiter: read-only calls may run concurrently with each other.
    pub fn is_read_only(&self, tool_name: &str) -> bool {
        self.registry.get(tool_name).is_some_and(|t| t.is_read_only())
    }
}

/// Cap every string in a tool result to `max_bytes`, appending a tail
/// marker to any that were cut. Structure is preserved so callers that
/// index into the result (e.g. `result["text"]`) keep working.
fn truncate_value(value: Value, max_bytes: usize) -> Value {
    match value {
        Value::String(s) if s.len() > max_bytes => {
            let mut cut = s.len().min(max_bytes);
            while cut > 0 && !s.is_char_boundary(cut) {
                cut -= 1;
            }
            Value::String(format!("{}{TRUNCATION_MARKER}", &s[..cut]))
        }
        Value::Array(items) => Value::Array(items.into_iter().map(|v| truncate_value(v, max_bytes)).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, truncate_value(v, max_bytes))).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::config::PolicyConfig;
    use ag_tools::InMemoryToolRegistry;

    fn dispatcher(registry: InMemoryToolRegistry, policy_cfg: PolicyConfig) -> Dispatcher {
        Dispatcher::new(
            Arc::new(registry),
            Arc::new(PolicyGate::new(policy_cfg).unwrap()),
            Arc::new(CircuitBreaker::new(3)),
            Arc::new(ApprovalBroker::new(Duration::from_secs(60))),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn dispatches_echo_successfully() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ag_tools::ProcessManager::new(ag_domain::config::ExecConfig::default()));
        let registry = InMemoryToolRegistry::with_builtins(dir.path().to_path_buf(), manager);
        let dispatcher = dispatcher(registry, PolicyConfig::default());
        let call = ToolCall { call_id: "c1".into(), tool_name: "echo".into(), arguments: json!({ "text": "hi" }) };
        let outcome = dispatcher.dispatch("s1", &ToolPolicy::default(), &call, &CancelToken::new()).await.unwrap();
        match outcome {
            DispatchOutcome::Completed { result, is_error } => {
                assert!(!is_error);
                assert_eq!(result["text"], "hi");
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn agent_tool_policy_blocks_before_global_gate() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ag_tools::ProcessManager::new(ag_domain::config::ExecConfig::default()));
        let registry = InMemoryToolRegistry::with_builtins(dir.path().to_path_buf(), manager);
        let dispatcher = dispatcher(registry, PolicyConfig::default());
        let policy = ToolPolicy { allow: vec![], deny: vec!["echo".into()] };
        let call = ToolCall { call_id: "c1".into(), tool_name: "echo".into(), arguments: json!({ "text": "hi" }) };
        let outcome = dispatcher.dispatch("s1", &policy, &call, &CancelToken::new()).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Blocked { .. }));
    }

    #[tokio::test]
    async fn dangerous_pattern_trips_circuit_breaker() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ag_tools::ProcessManager::new(ag_domain::config::ExecConfig::default()));
        let registry = InMemoryToolRegistry::with_builtins(dir.path().to_path_buf(), manager);
        let mut cfg = PolicyConfig::default();
        cfg.circuit_breaker_threshold = 1;
        let dispatcher = dispatcher(registry, cfg);
        let call = ToolCall { call_id: "c1".into(), tool_name: "exec".into(), arguments: json!({ "command": "rm -rf /" }) };
        let first = dispatcher.dispatch("s1", &ToolPolicy::default(), &call, &CancelToken::new()).await.unwrap();
        assert!(matches!(first, DispatchOutcome::Blocked { .. }));
        let second = dispatcher.dispatch("s1", &ToolPolicy::default(), &call, &CancelToken::new()).await.unwrap();
        assert!(matches!(second, DispatchOutcome::CircuitOpen));
    }

    #[tokio::test]
    async fn missing_tool_errors() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ag_tools::ProcessManager::new(ag_domain::config::ExecConfig::default()));
        let registry = InMemoryToolRegistry::with_builtins(dir.path().to_path_buf(), manager);
        let dispatcher = dispatcher(registry, PolicyConfig::default());
        let call = ToolCall { call_id: "c1".into(), tool_name: "nonexistent".into(), arguments: json!({}) };
        let result = dispatcher.dispatch("s1", &ToolPolicy::default(), &call, &CancelToken::new()).await;
        assert!(matches!(result, Err(Error::ToolMissing(_))));
    }
}
