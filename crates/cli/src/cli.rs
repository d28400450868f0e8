use clap::{Parser, Subcommand};

/// csoctl — conversational customer-service orchestrator, manual test harness.
#[derive(Debug, Parser)]
#[command(name = "csoctl", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start an interactive REPL turn loop (default when no subcommand is given).
    Chat {
        /// Session id to resume or create.
        #[arg(long, default_value = "cli")]
        session: String,
    },
    /// Send a single message and print the response, then exit.
    Run {
        /// The message to send.
        message: String,
        /// Session id (defaults to "cli:run").
        #[arg(long, default_value = "cli:run")]
        session: String,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults filled in) as TOML.
    Show,
}

/// Load the configuration from the path named by `CSO_CONFIG` (or
/// `config.toml` by default). Returns the parsed [`cso_domain::config::Config`]
/// and the path that was used.
pub fn load_config(
    known_tools: &std::collections::HashSet<String>,
) -> anyhow::Result<(cso_domain::config::Config, String)> {
    let config_path = std::env::var("CSO_CONFIG").unwrap_or_else(|_| "config.toml".into());

    if !std::path::Path::new(&config_path).exists() {
        anyhow::bail!(
            "config file not found: {config_path}\n\
             set CSO_CONFIG to point at a configuration document, or create one at that path"
        );
    }

    let raw = std::fs::read_to_string(&config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    let config = cso_domain::config::Config::load(&raw, known_tools)
        .map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?;

    Ok((config, config_path))
}
