use ag_domain::config::PolicyConfig;
use ag_domain::{Error, Result};
use regex::{Regex, RegexSet};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
    RequireApproval { reason: String },
}

impl PolicyDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PolicyGate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Evaluates tool calls against a [`PolicyConfig`] in fixed precedence
/// order: dangerous-pattern match, then blocklist, then allowlist, then
/// per-parameter approval rules, finally `default_allow`.
///
/// Regexes are precompiled at construction (mirroring the precompiled
/// `RegexSet` the exec endpoint checks commands against) so evaluation on
/// the hot path never pays compilation cost.
pub struct PolicyGate {
    config: PolicyConfig,
    dangerous_set: RegexSet,
    approval_patterns: Vec<Option<Regex>>,
    scrub_rules: Vec<(Regex, String)>,
}

impl PolicyGate {
    pub fn new(config: PolicyConfig) -> Result<Self> {
        let dangerous_set = RegexSet::new(&config.dangerous_patterns)
            .map_err(|e| Error::Config(format!("invalid dangerous_patterns: {e}")))?;

        let mut approval_patterns = Vec::with_capacity(config.require_approval.len());
        for rule in &config.require_approval {
            let compiled = match &rule.value_pattern {
                Some(p) => Some(
                    Regex::new(p)
                        .map_err(|e| Error::Config(format!("invalid require_approval pattern: {e}")))?,
                ),
                None => None,
            };
            approval_patterns.push(compiled);
        }

        let mut scrub_rules = Vec::with_capacity(config.scrub_rules.len());
        for rule in &config.scrub_rules {
            let re = Regex::new(&rule.pattern)
                .map_err(|e| Error::Config(format!("invalid scrub_rules pattern: {e}")))?;
            scrub_rules.push((re, rule.replacement.clone()));
        }

        Ok(Self { config, dangerous_set, approval_patterns, scrub_rules })
    }

    /// Evaluate a tool call. `arguments` is matched in its serialized form
    /// against dangerous patterns and approval value patterns.
    pub fn evaluate(&self, tool_name: &str, arguments: &Value) -> PolicyDecision {
        let haystack = format!("{tool_name} {arguments}");

        if self.dangerous_set.is_match(&haystack) {
            return PolicyDecision::Deny {
                reason: format!("tool call matched a dangerous pattern: {tool_name}"),
            };
        }

        if prefix_matches(&self.config.blocklist, tool_name) {
            return PolicyDecision::Deny {
                reason: format!("tool \"{tool_name}\" is blocklisted"),
            };
        }

        if prefix_matches(&self.config.allowlist, tool_name) {
            return PolicyDecision::Allow;
        }

        for (rule, pattern) in self.config.require_approval.iter().zip(&self.approval_patterns) {
            if !tool_matches(&rule.tool_name, tool_name) {
                continue;
            }
            let param_value = rule.parameter.as_ref().and_then(|p| arguments.get(p));
            let matched = match (pattern, param_value) {
                (Some(re), Some(value)) => re.is_match(&value.to_string()),
                (None, _) => true,
                (Some(_), None) => false,
            };
            if matched {
                let reason = rule
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("tool \"{tool_name}\" requires human approval"));
                return PolicyDecision::RequireApproval { reason };
            }
        }

        if self.config.default_allow {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Deny { reason: "default_allow is false and no rule matched".into() }
        }
    }

    /// Apply configured scrub rules to a blob of text (tool output, logged
    /// arguments) before it leaves the process boundary.
    pub fn scrub(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (re, replacement) in &self.scrub_rules {
            out = re.replace_all(&out, replacement.as_str()).into_owned();
        }
        out
    }

    /// Apply [`Self::scrub`] to every string leaf of a JSON value — the
    /// shape tool results and arguments actually arrive in.
    pub fn scrub_value(&self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.scrub(&s)),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.scrub_value(v)).collect()),
            Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, self.scrub_value(v))).collect()),
            other => other,
        }
    }

    pub fn circuit_breaker_threshold(&self) -> u32 {
        self.config.circuit_breaker_threshold
    }
}

fn prefix_matches(patterns: &[String], tool_name: &str) -> bool {
    let name = tool_name.to_ascii_lowercase();
    patterns.iter().any(|p| {
        let p = p.to_ascii_lowercase();
        p == "*" || name == p || name.starts_with(&format!("{p}."))
    })
}

fn tool_matches(pattern: &str, tool_name: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let name = tool_name.to_ascii_lowercase();
    pattern == "*" || name == pattern || name.starts_with(&format!("{pattern}."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::config::{ApprovalRule, ScrubRule};
    use serde_json::json;

    fn base_config() -> PolicyConfig {
        PolicyConfig::default()
    }

    #[test]
    fn dangerous_pattern_denies() {
        let gate = PolicyGate::new(base_config()).unwrap();
        let decision = gate.evaluate("exec", &json!({ "command": "rm -rf /" }));
        assert!(matches!(decision, PolicyDecision::Deny { .. }));
    }

    #[test]
    fn blocklist_denies_before_allowlist() {
        let mut cfg = base_config();
        cfg.blocklist = vec!["exec".into()];
        cfg.allowlist = vec!["exec".into()];
        let gate = PolicyGate::new(cfg).unwrap();
        let decision = gate.evaluate("exec", &json!({ "command": "ls" }));
        assert!(matches!(decision, PolicyDecision::Deny { .. }));
    }

    #[test]
    fn allowlist_short_circuits_default() {
        let mut cfg = base_config();
        cfg.default_allow = false;
        cfg.allowlist = vec!["file".into()];
        let gate = PolicyGate::new(cfg).unwrap();
        assert!(gate.evaluate("file.read", &json!({})).is_allow());
        assert!(!gate.evaluate("exec", &json!({})).is_allow());
    }

    #[test]
    fn require_approval_matches_parameter_pattern() {
        let mut cfg = base_config();
        cfg.require_approval = vec![ApprovalRule {
            tool_name: "file.delete".into(),
            parameter: Some("path".into()),
            value_pattern: Some(r"^/etc/".into()),
            reason: Some("deleting system config requires approval".into()),
        }];
        let gate = PolicyGate::new(cfg).unwrap();
        let decision = gate.evaluate("file.delete", &json!({ "path": "/etc/passwd" }));
        assert!(matches!(decision, PolicyDecision::RequireApproval { .. }));
        let decision = gate.evaluate("file.delete", &json!({ "path": "/tmp/scratch" }));
        assert!(decision.is_allow());
    }

    #[test]
    fn default_deny_when_configured() {
        let mut cfg = base_config();
        cfg.default_allow = false;
        let gate = PolicyGate::new(cfg).unwrap();
        assert!(!gate.evaluate("echo", &json!({})).is_allow());
    }

    #[test]
    fn scrub_replaces_matches() {
        let mut cfg = base_config();
        cfg.scrub_rules = vec![ScrubRule { pattern: r"sk-[A-Za-z0-9]+".into(), replacement: "[redacted]".into() }];
        let gate = PolicyGate::new(cfg).unwrap();
        let scrubbed = gate.scrub("key is sk-abc123xyz, keep going");
        assert_eq!(scrubbed, "key is [redacted], keep going");
    }

    #[test]
    fn scrub_value_redacts_nested_string_leaves() {
        let mut cfg = base_config();
        cfg.scrub_rules = vec![ScrubRule { pattern: r"sk-[A-Za-z0-9]+".into(), replacement: "[redacted]".into() }];
        let gate = PolicyGate::new(cfg).unwrap();
        let scrubbed = gate.scrub_value(serde_json::json!({
            "stdout": "key is sk-abc123xyz",
            "lines": ["sk-def456", "unrelated"],
        }));
        assert_eq!(scrubbed["stdout"], "key is [redacted]");
        assert_eq!(scrubbed["lines"][0], "[redacted]");
        assert_eq!(scrubbed["lines"][1], "unrelated");
    }

    #[test]
    fn invalid_regex_is_rejected_at_construction() {
        let mut cfg = base_config();
        cfg.dangerous_patterns = vec!["[invalid".into()];
        assert!(PolicyGate::new(cfg).is_err());
    }
}
