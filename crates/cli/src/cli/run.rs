//! `ag-cli run` — send one message and print the resulting turn, then
//! exit. Adapted from the teacher's `gateway::cli::run`, minus the
//! session-store flush (there is no persistent store here).

use std::path::PathBuf;

use ag_context::ContextBuilder;
use ag_domain::config::{ConfigSeverity, ToolPolicy};
use ag_domain::event::Event;
use ag_runtime::TurnOutcome;
use ag_tools::ToolRegistry;

use crate::bootstrap;
use crate::cli::load_config;

pub async fn run(message: String, session: Option<String>, workspace: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let (config, config_path) = load_config()?;
    let issues = config.validate();
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        for issue in &issues {
            eprintln!("{issue}");
        }
        anyhow::bail!("refusing to start: {config_path} has configuration errors");
    }

    let workspace_root = workspace.map(Ok).unwrap_or_else(std::env::current_dir)?;
    let runtime = bootstrap::build(config, workspace_root)?;

    let session_id = session.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
    let _permit = runtime.scheduler.acquire(&session_id).await?;
    let tool_defs = runtime.registry.definitions();
    let builder = ContextBuilder::new("You are a helpful assistant running from the command line.".to_string(), 8_000);
    let mut history = Vec::new();
    let cancel = runtime.cancel_map.register(&session_id);
    let policy = ToolPolicy::default();

    let mut event_rx = runtime.event_rx;
    let printer = tokio::spawn(async move {
        let mut collected = Vec::new();
        while let Some(event) = event_rx.recv().await {
            let terminal = matches!(event, Event::Done { .. } | Event::Error { .. });
            if json {
                collected.push(event);
            } else {
                print_event(&event);
            }
            if terminal {
                break;
            }
        }
        collected
    });

    let outcome = runtime
        .turn_runner
        .run(&session_id, &policy, &builder, &mut history, &message, &tool_defs, &cancel, None, &[], None)
        .await?;
    runtime.cancel_map.remove(&session_id);

    let events = printer.await.unwrap_or_default();

    if json {
        let payload = serde_json::json!({
            "session_id": session_id,
            "events": events,
            "outcome": format!("{outcome:?}"),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    }

    match outcome {
        TurnOutcome::Done { final_text, .. } => {
            if !json {
                println!("{final_text}");
            }
            Ok(())
        }
        TurnOutcome::Truncated { partial_text, .. } => {
            if !json {
                println!("{partial_text}");
            }
            anyhow::bail!("turn truncated: model hit its output length limit");
        }
        TurnOutcome::Cancelled { .. } => anyhow::bail!("turn was cancelled"),
        TurnOutcome::Paused { pending_tool_calls, .. } => {
            anyhow::bail!("turn paused with {} tool call(s) pending", pending_tool_calls.len())
        }
        TurnOutcome::IterationLimit => anyhow::bail!("iteration limit reached without a final answer"),
        TurnOutcome::PolicyCircuitOpen => anyhow::bail!("policy circuit breaker is open for this session"),
    }
}

fn print_event(event: &Event) {
    match event {
        Event::TextDelta { text, .. } => {
            print!("{text}");
            use std::io::Write;
            std::io::stdout().flush().ok();
        }
        Event::ToolCallRequested { call, .. } => {
            eprintln!("\x1B[2m[tool: {}]\x1B[0m", call.tool_name);
        }
        Event::ToolCallBlocked { tool_name, reason, .. } => {
            eprintln!("\x1B[2m[tool blocked: {tool_name} — {reason}]\x1B[0m");
        }
        Event::Error { message, .. } => {
            eprintln!("\x1B[31merror: {message}\x1B[0m");
        }
        Event::Done { .. } => {
            println!();
        }
        _ => {}
    }
}
