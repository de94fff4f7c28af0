//! `config validate` / `config show` — adapted from the teacher's
//! `gateway::cli::config`.

use ag_domain::config::{Config, ConfigSeverity};

/// Validate `config` (read from `config_path`) and print each issue.
/// Returns `true` when there are no errors (warnings are non-fatal).
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{config_path}: OK, no issues found");
        return true;
    }

    let mut error_count = 0;
    let mut warning_count = 0;
    for issue in &issues {
        println!("{issue}");
        match issue.severity {
            ConfigSeverity::Error => error_count += 1,
            ConfigSeverity::Warning => warning_count += 1,
        }
    }

    println!("\n{config_path}: {error_count} error(s), {warning_count} warning(s)");
    error_count == 0
}

/// Print the effective configuration as TOML.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let rendered = toml::to_string_pretty(config)?;
    println!("{rendered}");
    Ok(())
}
