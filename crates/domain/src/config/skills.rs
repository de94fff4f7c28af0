use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Skills — selectable prompt-fragment bundles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A bundle of prompt fragments a session can opt into. A session's
/// `selected_skill_ids` names which entries of `Config.skills` are active
/// for it (empty set enables all of them); the Context Builder composes
/// the active set, sorted by `priority`, into the system prompt.
///
/// Tool/hook provisioning from skills belongs to the tool registry, not
/// this config surface.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SkillConfig {
    /// Composed in ascending order, so a higher-priority skill's
    /// instructions land closer to the user turn.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub system_prompt: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_skill_has_zero_priority_and_empty_prompt() {
        let skill = SkillConfig::default();
        assert_eq!(skill.priority, 0);
        assert!(skill.system_prompt.is_empty());
    }
}
