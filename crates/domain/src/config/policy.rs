use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy Gate configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Global policy defaults the gate evaluates on top of each agent's own
/// [`crate::config::ToolPolicy`]. Evaluation order when a tool call arrives:
/// dangerous-rule match, then blocklist, then allowlist, then per-parameter
/// rules, finally `default_allow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Regex patterns matched against `"<tool_name> <arguments-json>"`; a
    /// match always blocks regardless of allow/deny lists.
    #[serde(default = "d_dangerous_patterns")]
    pub dangerous_patterns: Vec<String>,
    /// Tool name prefixes blocked outright.
    #[serde(default)]
    pub blocklist: Vec<String>,
    /// Tool name prefixes allowed outright (checked after the blocklist).
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// Per-tool parameter rules that force human approval.
    #[serde(default)]
    pub require_approval: Vec<ApprovalRule>,
    /// Regex replacement rules applied to tool arguments/output before they
    /// are logged or fed back to the model.
    #[serde(default)]
    pub scrub_rules: Vec<ScrubRule>,
    /// Outcome when none of the rules above match.
    #[serde(default = "d_true")]
    pub default_allow: bool,
    /// Consecutive policy-block events in one session before the circuit
    /// breaker trips and the turn is aborted.
    #[serde(default = "d_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            dangerous_patterns: d_dangerous_patterns(),
            blocklist: Vec::new(),
            allowlist: Vec::new(),
            require_approval: Vec::new(),
            scrub_rules: Vec::new(),
            default_allow: true,
            circuit_breaker_threshold: d_circuit_breaker_threshold(),
        }
    }
}

/// A rule requiring human approval when `tool_name` matches and, if set,
/// `parameter`/`value_pattern` also match a call's arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub tool_name: String,
    #[serde(default)]
    pub parameter: Option<String>,
    #[serde(default)]
    pub value_pattern: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A redaction rule: any match of `pattern` is replaced with `replacement`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrubRule {
    pub pattern: String,
    #[serde(default = "d_redacted")]
    pub replacement: String,
}

fn d_redacted() -> String {
    "[redacted]".into()
}
fn d_true() -> bool {
    true
}
fn d_circuit_breaker_threshold() -> u32 {
    3
}
fn d_dangerous_patterns() -> Vec<String> {
    vec![
        r"rm\s+-rf\s+/".into(),
        r"mkfs\.".into(),
        r"dd\s+if=.+of=/dev/".into(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_unless_matched() {
        let cfg = PolicyConfig::default();
        assert!(cfg.default_allow);
        assert_eq!(cfg.circuit_breaker_threshold, 3);
        assert!(!cfg.dangerous_patterns.is_empty());
    }

    #[test]
    fn scrub_rule_default_replacement() {
        let rule = ScrubRule { pattern: "sk-.*".into(), replacement: d_redacted() };
        assert_eq!(rule.replacement, "[redacted]");
    }
}
