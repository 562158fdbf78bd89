//! Hohenheim daemon - serves the assistant over HTTP

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use hohenheim::Assistant;
use hohenheim::config::Config;
use hohenheim::error::Result;

/// Hohenheim - a personal assistant with short- and long-term memory
#[derive(Parser)]
#[command(name = "hohenheim")]
#[command(about = "A personal assistant with short- and long-term memory")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server (default command)
    #[command(name = "serve")]
    Serve,
    /// Load and validate the configuration, then exit
    #[command(name = "check-config")]
    CheckConfig,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config).await,
        Some(Command::CheckConfig) => check_config(cli.config),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hohenheim=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn check_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path.as_deref())?;
    config.validate()?;
    println!("Configuration OK");
    Ok(())
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting Hohenheim daemon");

    let config = Config::load(config_path.as_deref())?;
    tracing::debug!("Config loaded: {:?}", config);

    let assistant = Arc::new(Assistant::from_config(&config).await?);
    hohenheim::server::serve(&config.server, assistant).await?;

    tracing::info!("Hohenheim daemon stopped");
    Ok(())
}
