mod bootstrap;
mod chat;
mod cli;
mod config_cmd;
mod run;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let known_tools = bootstrap::demo_tool_names();

    match args.command {
        None => {
            init_tracing();
            let (config, _path) = cli::load_config(&known_tools)?;
            let state = bootstrap::build_app_state(Arc::new(config), state_dir()).await?;
            chat::chat(state, "cli".to_string()).await
        }
        Some(Command::Chat { session }) => {
            init_tracing();
            let (config, _path) = cli::load_config(&known_tools)?;
            let state = bootstrap::build_app_state(Arc::new(config), state_dir()).await?;
            chat::chat(state, session).await
        }
        Some(Command::Run { message, session }) => {
            init_tracing();
            let (config, _path) = cli::load_config(&known_tools)?;
            let state = bootstrap::build_app_state(Arc::new(config), state_dir()).await?;
            run::run(state, session, message).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = cli::load_config(&known_tools)?;
            if !config_cmd::validate(&config, &path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _path) = cli::load_config(&known_tools)?;
            config_cmd::show(&config);
            Ok(())
        }
    }
}

fn state_dir() -> std::path::PathBuf {
    std::env::var_os("CSO_STATE_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from(".cso-state"))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cso_cli=debug")))
        .init();
}
