//! `csoctl chat` — interactive REPL turn loop.

use std::io::Write;

use cso_domain::chunk::Chunk;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::AppState;

pub async fn chat(state: AppState, mut session_id: String) -> anyhow::Result<()> {
    let history_path = dirs_home().join(".cso_chat_history.txt");
    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    eprintln!("csoctl interactive chat");
    eprintln!("Session: {session_id}  |  Type /help for commands, Ctrl+D to exit");
    eprintln!();

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
                    if handle_slash_command(trimmed, &mut session_id, &state) {
                        break;
                    }
                    continue;
                }

                if let Err(e) = send_message(&state, &session_id, trimmed).await {
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

fn dirs_home() -> std::path::PathBuf {
    std::env::var_os("HOME").map(std::path::PathBuf::from).unwrap_or_default()
}

/// Returns `true` if the REPL should exit.
fn handle_slash_command(input: &str, session_id: &mut String, state: &AppState) -> bool {
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0];
    let arg = parts.get(1).map(|s| s.trim());

    match cmd {
        "/exit" | "/quit" => return true,
        "/session" => {
            if let Some(name) = arg.filter(|s| !s.is_empty()) {
                *session_id = name.to_string();
                eprintln!("Session switched to: {session_id}");
            } else {
                eprintln!("Current session: {session_id}");
                eprintln!("Usage: /session <name>");
            }
        }
        "/reset" => {
            *session_id = format!("{session_id}:{}", uuid::Uuid::new_v4());
            eprintln!("Session reset. New session id: {session_id}");
        }
        "/stats" => {
            let snapshot = state.events.metrics().snapshot();
            match serde_json::to_string_pretty(&snapshot) {
                Ok(s) => println!("{s}"),
                Err(e) => eprintln!("error formatting stats: {e}"),
            }
        }
        "/help" => {
            eprintln!("Commands:");
            eprintln!("  /session <name>  Switch to a named session");
            eprintln!("  /reset           Start a fresh session (new id)");
            eprintln!("  /stats           Print the operator metrics snapshot");
            eprintln!("  /exit, /quit     Exit the chat");
            eprintln!("  /help            Show this help");
        }
        other => eprintln!("Unknown command: {other}  (type /help for a list)"),
    }

    false
}

async fn send_message(state: &AppState, session_id: &str, user_message: &str) -> anyhow::Result<()> {
    let mut rx = state
        .orchestrator
        .turn(session_id.to_string(), user_message.to_string(), CancellationToken::new())
        .await?;

    while let Some(chunk) = rx.recv().await {
        match chunk {
            Chunk::Token { text } => {
                print!("{text}");
                std::io::stdout().flush().ok();
            }
            Chunk::ToolCallBegin { name, .. } => {
                eprintln!("\x1B[2m[tool: {name}]\x1B[0m");
            }
            Chunk::ToolCallEnd { result_summary, .. } => {
                eprintln!("\x1B[2m[result: {result_summary}]\x1B[0m");
            }
            Chunk::Done { .. } => {
                println!();
                println!();
            }
        }
    }

    Ok(())
}
