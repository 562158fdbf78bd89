use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hohenheim::config::Config;
use hohenheim_cli::commands::{ChatCommand, ConfigCommand, MemoryCommand, StatsCommand};
use hohenheim_cli::error::CliResult;
use hohenheim_cli::output::OutputFormat;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hohenheim-cli")]
#[command(about = "Hohenheim CLI - chat with the assistant and inspect its memory")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Start an interactive session")]
    Chat(ChatCommand),

    #[clap(about = "Inspect long-term memory")]
    Memory(MemoryCommand),

    #[clap(about = "Show long-term memory statistics")]
    Stats(StatsCommand),

    #[clap(about = "Configuration commands")]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    if let Command::Config(cmd) = &cli.command {
        return cmd.execute(cli.config.as_deref(), format);
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }

    match &cli.command {
        Command::Chat(cmd) => cmd.execute(&config, format).await,
        Command::Memory(cmd) => cmd.execute(&config, format).await,
        Command::Stats(cmd) => cmd.execute(&config, format).await,
        Command::Config(_) => unreachable!(),
    }
}

/// Quiet by default so log lines do not interleave with chat output
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
