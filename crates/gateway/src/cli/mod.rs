pub mod config;

use clap::{Parser, Subcommand};

/// ringline — an outbound real-estate sales calling gateway.
#[derive(Debug, Parser)]
#[command(name = "ringline", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
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

/// Load the configuration from the path named by `RINGLINE_CONFIG` (or
/// `config.toml` by default). Shared by `serve` and `config` subcommands.
pub fn load_config() -> anyhow::Result<(ringline_domain::config::Config, String)> {
    let config_path = std::env::var("RINGLINE_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let raw = std::fs::read_to_string(&config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    let config = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?;

    Ok((config, config_path))
}
