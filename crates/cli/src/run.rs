//! `csoctl run` — one-shot execution command.

use std::io::Write;

use cso_domain::chunk::Chunk;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::AppState;

pub async fn run(state: AppState, session_id: String, message: String) -> anyhow::Result<()> {
    let mut rx = state.orchestrator.turn(session_id, message, CancellationToken::new()).await?;

    while let Some(chunk) = rx.recv().await {
        match chunk {
            Chunk::Token { text } => {
                print!("{text}");
                std::io::stdout().flush().ok();
            }
            Chunk::ToolCallBegin { name, .. } => eprintln!("[tool: {name}]"),
            Chunk::ToolCallEnd { result_summary, .. } => eprintln!("[result: {result_summary}]"),
            Chunk::Done { .. } => println!(),
        }
    }

    Ok(())
}
