mod bootstrap;
mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let parsed = Cli::parse();

    match parsed.command {
        None => {
            println!("ag-cli: no subcommand given. Try `ag-cli run \"hello\"` or `ag-cli chat`. See --help for details.");
            Ok(())
        }

        Some(Command::Run { message, session, workspace, json }) => {
            cli::run::run(message, session, workspace, json).await
        }

        Some(Command::Chat { session, workspace }) => {
            let session_key = session.unwrap_or_else(|| format!("chat-{}", uuid::Uuid::new_v4()));
            cli::chat::chat(session_key, workspace).await
        }

        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            let valid = cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }

        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::config::show(&config)
        }

        Some(Command::Version) => {
            println!("ag-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ag_cli=debug")))
        .json()
        .init();
}
