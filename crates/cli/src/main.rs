//! Helmsman CLI.
//!
//! Commands:
//! - `onboard`    Write a default config file
//! - `agent`      Interactive chat or single-message mode
//! - `config`     Validate and print the effective configuration
//! - `providers`  List the configured providers

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use helmsman_config::AppConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "helmsman", about = "Helmsman agent runtime", version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.helmsman/config.toml
    #[arg(short, long, global = true, env = "HELMSMAN_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Onboard,

    /// Chat with the agent
    Agent {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Validate and print the effective configuration
    Config,

    /// List configured providers
    Providers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Onboard => {
            init_tracing(cli.verbose, "info", false);
            commands::onboard::run(config_path)?;
        }
        Commands::Agent { message } => {
            let config = setup(cli.verbose, config_path)?;
            commands::agent::run(&config, message).await?;
        }
        Commands::Config => {
            let config = setup(cli.verbose, config_path)?;
            commands::config_cmd::show(&config)?;
        }
        Commands::Providers => {
            let config = setup(cli.verbose, config_path)?;
            commands::providers::run(&config);
        }
    }

    Ok(())
}

/// Load the configuration and install logging from it.
fn setup(verbose: bool, path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = load_config(path)?;
    init_tracing(verbose, &config.logging.level, config.logging.json);
    Ok(config)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env(|key| std::env::var(key).ok());
            config.validate()?;
            config
        }
        None => AppConfig::load().context("Failed to load config")?,
    };
    Ok(config)
}

/// `RUST_LOG` wins; otherwise `--verbose` or the configured level.
fn init_tracing(verbose: bool, level: &str, json: bool) {
    let default = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
