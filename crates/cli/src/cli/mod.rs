//! Top-level CLI surface: argument parsing and config loading.
//!
//! Grounded on the teacher's `gateway::cli::mod` (`Cli`/`Command`,
//! `load_config`); the subcommand set is trimmed to what this binary
//! actually drives — there is no HTTP server, so `Serve`/`Systemd` and
//! the dashboard-facing commands are dropped.

pub mod chat;
pub mod config;
pub mod run;

use clap::{Parser, Subcommand};

use ag_domain::config::Config;

#[derive(Parser, Debug)]
#[command(name = "ag-cli", version, about = "Runs and inspects the agent runtime from the command line.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one message and print the resulting turn, then exit.
    Run {
        /// The message to send.
        message: String,
        /// Session key to resume (defaults to a fresh random session).
        #[arg(long)]
        session: Option<String>,
        /// Directory tool calls are sandboxed to (defaults to the current directory).
        #[arg(long)]
        workspace: Option<std::path::PathBuf>,
        /// Emit the turn's events as a single JSON object instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Start an interactive REPL against the runtime.
    Chat {
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        workspace: Option<std::path::PathBuf>,
    },
    /// Configuration inspection.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the binary's version and exit.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the configuration file and report errors/warnings.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

/// Load configuration from the path named by `AG_CONFIG` (default
/// `"config.toml"`), falling back to [`Config::default`] when the file
/// doesn't exist. Returns the config plus the path it was read from (or
/// would have been read from, for diagnostics).
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let path = std::env::var("AG_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

    if !std::path::Path::new(&path).exists() {
        return Ok((Config::default(), path));
    }

    let raw = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("failed to read config file '{path}': {e}"))?;
    let config: Config = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse config file '{path}': {e}"))?;
    Ok((config, path))
}
