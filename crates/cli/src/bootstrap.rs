//! Wires a loaded [`Config`] into a running instance of the agent
//! runtime: provider router, tool registry, policy gate, dispatcher,
//! turn runner, PDA executor, scheduler, and cancel map.
//!
//! Grounded on the teacher's `gateway::main::run_server`, which performs
//! the same sequence (providers -> router -> tools -> policy -> dispatcher
//! -> session store) before starting the HTTP server; this module stops
//! short of any transport, since `ag-cli` drives the runtime in-process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ag_domain::config::{Config, RoleConfig};
use ag_policy::{CircuitBreaker, PolicyGate};
use ag_providers::stub::ScriptedTurn;
use ag_providers::{LlmRouter, ProviderRegistry, StubProvider};
use ag_runtime::{ApprovalBroker, CancelMap, Dispatcher, EventBus, Scheduler, TurnRunner};
use ag_tools::{InMemoryToolRegistry, ProcessManager, ToolRegistry};
use tokio::sync::mpsc;

/// Everything a CLI command needs to drive one or more turns.
pub struct Runtime {
    pub config: Config,
    pub router: Arc<LlmRouter>,
    pub registry: Arc<dyn ToolRegistry>,
    pub turn_runner: Arc<TurnRunner>,
    pub events: EventBus,
    pub event_rx: mpsc::Receiver<ag_domain::event::Event>,
    pub scheduler: Arc<Scheduler>,
    pub cancel_map: Arc<CancelMap>,
}

/// Build the runtime described by `config`. When `config.llm.providers`
/// is empty, falls back to an offline, looping [`StubProvider`] so the
/// CLI boots and runs fully without network access or API keys.
pub fn build(config: Config, workspace_root: PathBuf) -> anyhow::Result<Runtime> {
    let router = Arc::new(build_router(&config)?);

    let process_manager = Arc::new(ProcessManager::new(config.tools.exec.clone()));
    let registry: Arc<dyn ToolRegistry> =
        Arc::new(InMemoryToolRegistry::with_builtins(workspace_root, process_manager));

    let policy = Arc::new(PolicyGate::new(config.policy.clone())?);
    let circuit = Arc::new(CircuitBreaker::new(config.policy.circuit_breaker_threshold));
    let approvals = Arc::new(ApprovalBroker::new(Duration::from_secs(
        config.runtime.approval_default_ttl_secs,
    )));
    let tool_timeout = Duration::from_secs(config.runtime.tool_timeout_default_secs);
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), policy, circuit, approvals, tool_timeout));

    let (events, event_rx) = EventBus::new(config.runtime.event_channel_capacity);
    let turn_runner = Arc::new(TurnRunner::new(router.clone(), dispatcher, events.clone(), &config.runtime));

    let scheduler = Arc::new(Scheduler::new(config.runtime.session_queue_depth, config.runtime.max_concurrent_sessions));
    let cancel_map = Arc::new(CancelMap::new());

    Ok(Runtime { config, router, registry, turn_runner, events, event_rx, scheduler, cancel_map })
}

fn build_router(config: &Config) -> anyhow::Result<LlmRouter> {
    if !config.llm.providers.is_empty() {
        return Ok(LlmRouter::from_config(&config.llm)?);
    }

    tracing::warn!("no LLM providers configured; booting against the offline stub provider");

    let stub = Arc::new(
        StubProvider::new(
            "stub",
            vec![ScriptedTurn::text(
                "I'm running against the offline stub provider (no providers configured). \
                 Add entries under [[llm.providers]] in your config to talk to a real model.",
            )],
        )
        .looping(),
    );

    let mut providers: HashMap<String, Arc<dyn ag_providers::LlmProvider>> = HashMap::new();
    providers.insert("stub".to_string(), stub);

    let mut roles = HashMap::new();
    let mut role_configs: HashMap<String, RoleConfig> = HashMap::new();
    for role in ["planner", "executor", "summarizer", "embedder"] {
        roles.insert(role.to_string(), "stub/stub-model".to_string());
        role_configs.insert(
            role.to_string(),
            RoleConfig {
                model: "stub/stub-model".to_string(),
                require_tools: false,
                require_json: false,
                require_streaming: false,
                fallbacks: Vec::new(),
            },
        );
    }

    let registry = ProviderRegistry::with_providers(providers, roles);
    Ok(LlmRouter::new(registry, role_configs, config.llm.default_timeout_ms))
}
