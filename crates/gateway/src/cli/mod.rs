pub mod config;
pub mod reconcile;

use clap::{Parser, Subcommand};

/// DeckWeaver: conversational oracle-deck co-authoring server.
#[derive(Debug, Parser)]
#[command(name = "deckweaver", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Promote half-finalized decks and generate their images, then exit.
    Reconcile,
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `DW_CONFIG` (or `config.toml`
/// by default). A missing file yields the built-in defaults.
pub fn load_config() -> anyhow::Result<(dw_domain::config::Config, String)> {
    let config_path = std::env::var("DW_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = parse_config_file(&config_path)?;
    Ok((config, config_path))
}

fn parse_config_file(config_path: &str) -> anyhow::Result<dw_domain::config::Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(dw_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
}
