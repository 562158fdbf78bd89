use std::path::Path;

use clap::{Parser, Subcommand};
use hohenheim::config::Config;

use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct ConfigCommand {
    #[clap(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    #[clap(about = "Print the effective configuration")]
    Show,

    #[clap(about = "List the config file locations that are searched")]
    Path,

    #[clap(about = "Load and validate the configuration")]
    Validate,
}

impl ConfigCommand {
    pub fn execute(&self, config_path: Option<&Path>, format: OutputFormat) -> CliResult<()> {
        match self.command {
            ConfigSubcommand::Show => {
                let config = Config::load(config_path)?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                    OutputFormat::Table => print!("{}", toml::to_string_pretty(&config)?),
                }
            }
            ConfigSubcommand::Path => {
                let candidates = match config_path {
                    Some(path) => vec![path.to_path_buf()],
                    None => Config::default_paths(),
                };
                match format {
                    OutputFormat::Json => {
                        let output: Vec<_> = candidates
                            .iter()
                            .map(|p| serde_json::json!({"path": p, "exists": p.exists()}))
                            .collect();
                        println!("{}", serde_json::to_string_pretty(&output)?);
                    }
                    OutputFormat::Table => {
                        for path in &candidates {
                            let marker = if path.exists() { "found" } else { "missing" };
                            println!("{marker:>8}  {}", path.display());
                        }
                    }
                }
            }
            ConfigSubcommand::Validate => {
                Config::load(config_path)?.validate()?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::json!({"valid": true})),
                    OutputFormat::Table => println!("Configuration OK"),
                }
            }
        }
        Ok(())
    }
}
