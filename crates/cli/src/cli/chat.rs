//! `ag-cli chat` — interactive REPL. Adapted from the teacher's
//! `gateway::cli::chat`: same readline loop, persistent history file, and
//! slash-command set, driving a single in-process [`TurnRunner`] instead
//! of a session store shared with an HTTP server.

use std::path::PathBuf;

use ag_context::ContextBuilder;
use ag_domain::config::{ConfigSeverity, ToolPolicy};
use ag_domain::event::Event;
use ag_domain::tool::Message;
use ag_tools::ToolRegistry;

use crate::bootstrap::{self, Runtime};
use crate::cli::load_config;

pub async fn chat(mut session_key: String, workspace: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, config_path) = load_config()?;
    let issues = config.validate();
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        for issue in &issues {
            eprintln!("{issue}");
        }
        anyhow::bail!("refusing to start: {config_path} has configuration errors");
    }

    let workspace_root = workspace.map(Ok).unwrap_or_else(std::env::current_dir)?;
    let mut runtime = bootstrap::build(config, workspace_root)?;

    // The turn runner blocks on a full event channel, so something must
    // always be draining it — here, just logging tool-call visibility to
    // stderr for the duration of the REPL.
    let mut event_rx = std::mem::replace(&mut runtime.event_rx, tokio::sync::mpsc::channel(1).1);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(&event);
        }
    });

    let history_path = dirs::home_dir().unwrap_or_default().join(".ag-cli").join("chat_history.txt");
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    eprintln!("ag-cli interactive chat");
    eprintln!("Session: {session_key}  |  Type /help for commands, Ctrl+D to exit");
    eprintln!();

    let mut history: Vec<Message> = Vec::new();

    loop {
        let readline = rl.readline("you> ");
        match readline {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();

                if trimmed.starts_with('/') {
                    if handle_slash_command(trimmed, &mut session_key, &mut history) {
                        break;
                    }
                    continue;
                }

                if let Err(e) = send_message(&runtime, &session_key, &mut history, trimmed).await {
                    eprintln!("\x1B[31merror: {e}\x1B[0m");
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or /exit to quit)");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    rl.save_history(&history_path).ok();
    eprintln!("Goodbye!");
    Ok(())
}

/// Process a slash command. Returns `true` if the REPL should exit.
fn handle_slash_command(input: &str, session_key: &mut String, history: &mut Vec<Message>) -> bool {
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0];
    let arg = parts.get(1).map(|s| s.trim());

    match cmd {
        "/exit" | "/quit" => return true,

        "/session" => {
            if let Some(name) = arg.filter(|s| !s.is_empty()) {
                *session_key = name.to_string();
                history.clear();
                eprintln!("Session switched to: {session_key}");
            } else {
                eprintln!("Current session: {session_key}");
                eprintln!("Usage: /session <name>");
            }
        }

        "/clear" => {
            eprint!("\x1B[2J\x1B[1;1H");
        }

        "/reset" => {
            let ts = chrono::Utc::now().timestamp();
            *session_key = format!("{session_key}:{ts}");
            history.clear();
            eprintln!("Session reset. New session key: {session_key}");
        }

        "/help" => {
            eprintln!("Commands:");
            eprintln!("  /session <name>  Switch to a named session (clears history)");
            eprintln!("  /clear           Clear the screen");
            eprintln!("  /reset           Start a fresh session (new key, clears history)");
            eprintln!("  /exit, /quit     Exit the chat");
            eprintln!("  /help            Show this help");
        }

        other => {
            eprintln!("Unknown command: {other}  (type /help for a list)");
        }
    }

    false
}

async fn send_message(runtime: &Runtime, session_key: &str, history: &mut Vec<Message>, user_message: &str) -> anyhow::Result<()> {
    let _permit = runtime.scheduler.acquire(session_key).await?;
    let tool_defs = runtime.registry.definitions();
    let builder = ContextBuilder::new("You are a helpful assistant running from the command line.".to_string(), 8_000);
    let cancel = runtime.cancel_map.register(session_key);
    let policy = ToolPolicy::default();

    let outcome = runtime
        .turn_runner
        .run(session_key, &policy, &builder, history, user_message, &tool_defs, &cancel, None, &[], None)
        .await;
    runtime.cancel_map.remove(session_key);
    let outcome = outcome?;

    use ag_runtime::TurnOutcome;
    match outcome {
        TurnOutcome::Done { final_text, .. } => {
            println!("{final_text}");
            println!();
        }
        TurnOutcome::Truncated { partial_text, .. } => {
            println!("{partial_text}");
            eprintln!("\x1B[2m(truncated: model hit its output length limit)\x1B[0m");
        }
        TurnOutcome::Cancelled { partial_text } => {
            println!("{partial_text}");
            eprintln!("(turn cancelled)");
        }
        TurnOutcome::Paused { partial_text, pending_tool_calls } => {
            println!("{partial_text}");
            eprintln!("(turn paused with {} tool call(s) pending)", pending_tool_calls.len());
        }
        TurnOutcome::IterationLimit => {
            eprintln!("\x1B[31merror: iteration limit reached without a final answer\x1B[0m");
        }
        TurnOutcome::PolicyCircuitOpen => {
            eprintln!("\x1B[31merror: policy circuit breaker is open for this session\x1B[0m");
        }
    }
    Ok(())
}

fn log_event(event: &Event) {
    if let Event::ToolCallRequested { call, .. } = event {
        eprintln!("\x1B[2m[tool: {}]\x1B[0m", call.tool_name);
    }
}
