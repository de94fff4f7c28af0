use ag_domain::config::Config;

#[test]
fn default_iteration_limit_is_forty() {
    let config = Config::default();
    assert_eq!(config.runtime.iteration_limit, 40);
}

#[test]
fn explicit_runtime_overrides_parse() {
    let toml_str = r#"
[runtime]
iteration_limit = 10
session_queue_depth = 2
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.runtime.iteration_limit, 10);
    assert_eq!(config.runtime.session_queue_depth, 2);
}

#[test]
fn default_policy_allows_by_default() {
    let config = Config::default();
    assert!(config.policy.default_allow);
    assert!(!config.policy.dangerous_patterns.is_empty());
}

#[test]
fn empty_config_validates_with_only_warnings() {
    let config = Config::default();
    let issues = config.validate();
    assert!(issues.iter().all(|e| !matches!(e.severity, ag_domain::config::ConfigSeverity::Error)));
}
