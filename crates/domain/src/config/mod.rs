mod agents;
mod compaction;
mod llm;
mod observability;
mod policy;
mod runtime;
mod skills;
mod tools;

pub use agents::*;
pub use compaction::*;
pub use llm::*;
pub use observability::*;
pub use policy::*;
pub use runtime::*;
pub use skills::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Sub-agent definitions (key = agent_id), consulted by both the Agent
    /// Loop's `agent.run` tool and the PDA executor's `agent_ref` step.
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    /// Skill definitions (key = skill id), selected per-session via
    /// `Session.selected_skill_ids` and composed by the Context Builder.
    #[serde(default)]
    pub skills: HashMap<String, SkillConfig>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues. An empty
    /// vec means everything looks good; the CLI refuses to boot on any
    /// `ConfigSeverity::Error`, but boots with a warning log on `Warning`.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.runtime.iteration_limit == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "runtime.iteration_limit".into(),
                message: "iteration_limit must be greater than 0".into(),
            });
        }
        if self.runtime.session_queue_depth == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "runtime.session_queue_depth".into(),
                message: "session_queue_depth must be greater than 0".into(),
            });
        }
        if self.runtime.pda_max_recursion_default == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "runtime.pda_max_recursion_default".into(),
                message: "pda_max_recursion_default must be greater than 0".into(),
            });
        }

        if self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured".into(),
            });
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            }
            if provider.base_url.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: "provider base_url must not be empty".into(),
                });
            }
            if !provider.base_url.is_empty()
                && !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: format!(
                        "base_url must start with http:// or https:// (got \"{}\")",
                        provider.base_url
                    ),
                });
            }
            if !provider.id.is_empty() && !seen_ids.insert(&provider.id) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("llm.providers[{i}].id"),
                    message: format!(
                        "duplicate provider id \"{}\" — later provider will shadow earlier one",
                        provider.id
                    ),
                });
            }

            let needs_credentials = matches!(provider.auth.mode, AuthMode::ApiKey | AuthMode::QueryParam);
            if needs_credentials {
                let has_env = provider.auth.env.as_ref().is_some_and(|v| !v.is_empty());
                let has_key = provider.auth.key.as_ref().is_some_and(|v| !v.is_empty());
                let has_keys = !provider.auth.keys.is_empty();
                if !has_env && !has_key && !has_keys {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("llm.providers[{i}].auth"),
                        message: format!(
                            "provider \"{}\" uses {:?} auth mode but has no auth.env, auth.key, or auth.keys configured",
                            provider.id, provider.auth.mode
                        ),
                    });
                }
            }
        }

        for (i, pattern) in self.tools.exec_security.denied_patterns.iter().enumerate() {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("tools.exec_security.denied_patterns[{i}]"),
                    message: format!("invalid regex \"{pattern}\": {e}"),
                });
            }
        }
        for (i, pattern) in self.policy.dangerous_patterns.iter().enumerate() {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("policy.dangerous_patterns[{i}]"),
                    message: format!("invalid regex \"{pattern}\": {e}"),
                });
            }
        }
        for (i, rule) in self.policy.scrub_rules.iter().enumerate() {
            if let Err(e) = regex::Regex::new(&rule.pattern) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("policy.scrub_rules[{i}].pattern"),
                    message: format!("invalid regex \"{}\": {e}", rule.pattern),
                });
            }
        }

        // Every agent_ref step and route branch must resolve to a known agent.
        for (agent_id, agent_cfg) in &self.agents {
            validate_steps(agent_id, &agent_cfg.steps, &self.agents, &mut errors);
            if let Some(max_recursion) = agent_cfg.max_recursion {
                if max_recursion == 0 {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("agents.{agent_id}.max_recursion"),
                        message: "max_recursion override must be greater than 0".into(),
                    });
                }
            }
        }

        errors
    }
}

fn validate_steps(
    agent_id: &str,
    steps: &[Step],
    agents: &HashMap<String, AgentConfig>,
    errors: &mut Vec<ConfigError>,
) {
    for step in steps {
        match step {
            Step::AgentRef { target, .. } => {
                if !agents.contains_key(target) {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("agents.{agent_id}.steps[{}]", step.label()),
                        message: format!("agent_ref target \"{target}\" is not a known agent"),
                    });
                }
            }
            Step::Route { branches, .. } => {
                for target in branches.values() {
                    if target != "_default" && !agents.contains_key(target) {
                        errors.push(ConfigError {
                            severity: ConfigSeverity::Error,
                            field: format!("agents.{agent_id}.steps[{}]", step.label()),
                            message: format!("route branch target \"{target}\" is not a known agent"),
                        });
                    }
                }
            }
            Step::Loop { body, .. } => validate_steps(agent_id, body, agents, errors),
            Step::Parallel { branches, .. } => {
                for branch in branches {
                    validate_steps(agent_id, branch, agents, errors);
                }
            }
            Step::Prompt { .. } => {}
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            llm: LlmConfig {
                providers: vec![ProviderConfig {
                    id: "openai".into(),
                    kind: ProviderKind::OpenaiCompat,
                    base_url: "https://api.openai.com/v1".into(),
                    auth: AuthConfig {
                        mode: AuthMode::ApiKey,
                        env: Some("OPENAI_API_KEY".into()),
                        ..AuthConfig::default()
                    },
                    default_model: None,
                }],
                ..LlmConfig::default()
            },
            ..Config::default()
        }
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_passes() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn zero_iteration_limit_is_error() {
        let mut cfg = valid_config();
        cfg.runtime.iteration_limit = 0;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "runtime.iteration_limit").expect("expected error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn zero_session_queue_depth_is_error() {
        let mut cfg = valid_config();
        cfg.runtime.session_queue_depth = 0;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "runtime.session_queue_depth").is_some());
    }

    #[test]
    fn no_providers_is_warning() {
        let mut cfg = valid_config();
        cfg.llm.providers.clear();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.providers").expect("expected no-providers warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn provider_api_key_mode_no_credentials_is_error() {
        let mut cfg = valid_config();
        cfg.llm.providers[0].auth = AuthConfig {
            mode: AuthMode::ApiKey,
            env: None,
            key: None,
            keys: vec![],
            ..AuthConfig::default()
        };
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.providers[0].auth").expect("expected auth error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn invalid_dangerous_pattern_is_error() {
        let mut cfg = valid_config();
        cfg.policy.dangerous_patterns = vec!["[invalid".into()];
        let issues = cfg.validate();
        assert!(find_issue(&issues, "policy.dangerous_patterns[0]").is_some());
    }

    #[test]
    fn agent_ref_to_unknown_agent_is_error() {
        let mut cfg = valid_config();
        cfg.agents.insert(
            "writer".into(),
            AgentConfig {
                workspace_path: None,
                skills_path: None,
                tool_policy: ToolPolicy::default(),
                models: HashMap::new(),
                memory_mode: MemoryMode::default(),
                limits: AgentLimits::default(),
                compaction_enabled: false,
                steps: vec![Step::AgentRef { label: "review".into(), target: "reviewer".into() }],
                max_recursion: None,
            },
        );
        let issues = cfg.validate();
        let issue = find_issue(&issues, "agents.writer.steps").expect("expected agent_ref error");
        assert!(issue.message.contains("reviewer"));
    }

    #[test]
    fn agent_ref_to_known_agent_is_ok() {
        let mut cfg = valid_config();
        cfg.agents.insert("reviewer".into(), AgentConfig {
            workspace_path: None,
            skills_path: None,
            tool_policy: ToolPolicy::default(),
            models: HashMap::new(),
            memory_mode: MemoryMode::default(),
            limits: AgentLimits::default(),
            compaction_enabled: false,
            steps: vec![],
            max_recursion: None,
        });
        cfg.agents.insert(
            "writer".into(),
            AgentConfig {
                workspace_path: None,
                skills_path: None,
                tool_policy: ToolPolicy::default(),
                models: HashMap::new(),
                memory_mode: MemoryMode::default(),
                limits: AgentLimits::default(),
                compaction_enabled: false,
                steps: vec![Step::AgentRef { label: "review".into(), target: "reviewer".into() }],
                max_recursion: None,
            },
        );
        let issues = cfg.validate();
        assert!(find_issue(&issues, "agents.writer.steps").is_none());
    }
}
