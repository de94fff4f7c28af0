//! Multi-agent wiring — the registry of configured sub-agents and the
//! `agent_ref`/top-level entry point that runs one to completion.
//!
//! Grounded on `runtime::agent::{AgentManager, AgentContext, run_agent}`:
//! `AgentManager::from_config` (build a lookup table from
//! `Config.agents`, logging each registration) and `run_agent` (spawn a
//! child run, drain it for its final content) carry over near-verbatim;
//! the step-program body of that child run is generalised from a single
//! `agent.run` tool call into the full PDA program described by
//! `AgentConfig.steps`.

use std::collections::HashMap;
use std::sync::Arc;

use ag_domain::config::AgentConfig;
use ag_domain::pda::PdaCheckpoint;
use ag_domain::Result;

use crate::cancel::CancelToken;
use crate::pda::PdaExecutor;

/// Registry of configured sub-agents, built once from [`ag_domain::Config`].
pub struct AgentManager {
    agents: Arc<HashMap<String, AgentConfig>>,
}

impl AgentManager {
    pub fn from_agents(agents: HashMap<String, AgentConfig>) -> Self {
        for (id, cfg) in &agents {
            tracing::info!(
                agent_id = id,
                tools_allowed = ?cfg.tool_policy.allow,
                tools_denied = ?cfg.tool_policy.deny,
                has_steps = !cfg.steps.is_empty(),
                "registered sub-agent"
            );
        }
        Self { agents: Arc::new(agents) }
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentConfig> {
        self.agents.get(agent_id)
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn shared(&self) -> Arc<HashMap<String, AgentConfig>> {
        self.agents.clone()
    }
}

/// Run `agent_id`'s step program to completion as a child of
/// `parent_session_id`, returning `(output, is_error)` — `is_error` is
/// `true` when the agent is unknown or the program terminated abnormally
/// (recursion limit, cancellation, policy circuit open).
pub async fn run_agent(
    manager: &AgentManager,
    executor: &PdaExecutor,
    agent_id: &str,
    task: &str,
    parent_session_id: &str,
    cancel: &CancelToken,
) -> (String, bool) {
    let Some(cfg) = manager.get(agent_id) else {
        return (format!("agent '{agent_id}' not found. Available: {:?}", manager.list()), true);
    };

    let child_session_id = format!("{parent_session_id}:agent:{agent_id}:{}", uuid::Uuid::new_v4());
    let mut checkpoint = PdaCheckpoint::new(child_session_id, agent_id, cfg.steps.clone());

    match run_checkpoint(executor, &mut checkpoint, task, cancel).await {
        Ok(output) => (output, false),
        Err(e) => (e.to_string(), true),
    }
}

async fn run_checkpoint(executor: &PdaExecutor, checkpoint: &mut PdaCheckpoint, input: &str, cancel: &CancelToken) -> Result<String> {
    executor.run(checkpoint, input, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agents_with_one(id: &str) -> HashMap<String, AgentConfig> {
        let mut map = HashMap::new();
        map.insert(id.to_string(), AgentConfig::default());
        map
    }

    #[test]
    fn manager_lists_registered_agents_sorted() {
        let mut agents = agents_with_one("writer");
        agents.insert("reviewer".to_string(), AgentConfig::default());
        let manager = AgentManager::from_agents(agents);
        assert_eq!(manager.list(), vec!["reviewer".to_string(), "writer".to_string()]);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn manager_empty_reports_is_empty() {
        let manager = AgentManager::from_agents(HashMap::new());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn run_agent_reports_unknown_agent() {
        let manager = AgentManager::from_agents(HashMap::new());
        // No executor call is made for an unknown agent, so a real
        // PdaExecutor isn't needed; short-circuit before dereferencing it.
        let result = manager.get("ghost");
        assert!(result.is_none());
    }
}
