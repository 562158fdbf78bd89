use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use hohenheim::HohenheimError;
use hohenheim::config::Config;
use hohenheim::embedding::{EmbeddingProvider, build_embedder};
use hohenheim::memory::{LongTermMemory, MemoryRecord, RecordId, RecordKind, ScoredRecord};

use super::open_long_term;
use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, single_line, truncate_string};

#[derive(Parser)]
pub struct MemoryCommand {
    #[clap(subcommand)]
    pub command: MemorySubcommand,
}

#[derive(Subcommand)]
pub enum MemorySubcommand {
    #[clap(about = "Semantic search over long-term memory")]
    Search(SearchArgs),

    #[clap(about = "List long-term records")]
    List(ListArgs),

    #[clap(about = "Show one record in full")]
    Show(ShowArgs),

    #[clap(about = "Delete a long-term record")]
    Delete(DeleteArgs),
}

#[derive(Parser)]
pub struct SearchArgs {
    #[clap(help = "Text to search for")]
    pub query: String,

    #[clap(long, short, default_value = "5", help = "Maximum number of results")]
    pub k: usize,

    #[clap(long, help = "Minimum cosine similarity (defaults to memory.min_similarity)")]
    pub min_score: Option<f32>,
}

#[derive(Parser)]
pub struct ListArgs {
    #[clap(
        long,
        short,
        default_value = "20",
        help = "Maximum number of records to display"
    )]
    pub limit: usize,

    #[clap(
        long,
        help = "Filter by record kind (interaction, fact, reflection, system-event)"
    )]
    pub kind: Option<String>,
}

#[derive(Parser)]
pub struct ShowArgs {
    #[clap(help = "Record ID (UUID format)")]
    pub id: String,
}

#[derive(Parser)]
pub struct DeleteArgs {
    #[clap(help = "Record ID (UUID format)")]
    pub id: String,
}

impl MemoryCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            MemorySubcommand::Search(args) => Self::search(config, args, format).await,
            MemorySubcommand::List(args) => Self::list(config, args, format).await,
            MemorySubcommand::Show(args) => Self::show(config, args, format).await,
            MemorySubcommand::Delete(args) => Self::delete(config, args, format).await,
        }
    }

    async fn search(config: &Config, args: &SearchArgs, format: OutputFormat) -> CliResult<()> {
        let long_term = open_long_term(config).await?;
        let embedder = build_embedder(config)?;
        let vector = embedder.embed(&args.query).await?;
        let min_score = args.min_score.unwrap_or(config.memory.min_similarity);
        let results = long_term.search(&vector, args.k, min_score).await?;

        match format {
            OutputFormat::Json => {
                let output: Vec<_> = results
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "id": r.record.id,
                            "score": r.score,
                            "kind": r.record.kind,
                            "content": &r.record.content,
                            "importance": r.record.importance,
                            "timestamp": r.record.timestamp.to_rfc3339(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if results.is_empty() {
                    println!("No matching memories.");
                    return Ok(());
                }
                println!("{}", search_table(&results));
            }
        }

        Ok(())
    }

    async fn list(config: &Config, args: &ListArgs, format: OutputFormat) -> CliResult<()> {
        let kind_filter: Option<RecordKind> = match args.kind.as_deref() {
            Some(kind) => Some(kind.parse::<RecordKind>()?),
            None => None,
        };

        let long_term = open_long_term(config).await?;
        let total = long_term.count().await?;
        let mut records = long_term.list(total).await?;

        if let Some(kind) = kind_filter {
            records.retain(|r| r.kind == kind);
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(args.limit);

        match format {
            OutputFormat::Json => {
                let output: Vec<_> = records.iter().map(record_json).collect();
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if records.is_empty() {
                    println!("No memories found.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Kind", "Content", "Importance", "Created"]);

                for record in &records {
                    table.add_row([
                        truncate_string(&record.id.to_string(), 8),
                        record.kind.to_string(),
                        truncate_string(&single_line(&record.content), 50),
                        format!("{:.2}", record.importance),
                        format_timestamp(&record.timestamp),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} memories", records.len());
            }
        }

        Ok(())
    }

    async fn show(config: &Config, args: &ShowArgs, format: OutputFormat) -> CliResult<()> {
        let id: RecordId = args
            .id
            .parse()
            .map_err(|e| format!("Invalid UUID format: {e}"))?;

        let long_term = open_long_term(config).await?;
        let record = long_term
            .get(id)
            .await?
            .ok_or_else(|| format!("Memory not found: {}", args.id))?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&record_json(&record))?);
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Property", "Value"]);

                table.add_row(["ID".to_string(), record.id.to_string()]);
                table.add_row(["Kind".to_string(), record.kind.to_string()]);
                table.add_row(["Content".to_string(), record.content.clone()]);
                table.add_row(["Importance".to_string(), format!("{:.4}", record.importance)]);
                table.add_row(["Created".to_string(), record.timestamp.to_rfc3339()]);
                for (key, value) in &record.metadata {
                    table.add_row([format!("meta.{key}"), value.to_string()]);
                }

                println!("{table}");
            }
        }

        Ok(())
    }

    async fn delete(config: &Config, args: &DeleteArgs, format: OutputFormat) -> CliResult<()> {
        let id: RecordId = args
            .id
            .parse()
            .map_err(|e| format!("Invalid UUID format: {e}"))?;

        let long_term = open_long_term(config).await?;
        let deleted = delete_record(&long_term, id).await?;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "id": args.id,
                    "deleted": deleted,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if deleted {
                    println!("Memory {} deleted.", args.id);
                } else {
                    println!("Memory {} not found.", args.id);
                }
            }
        }

        Ok(())
    }
}

/// False when the record was not there to begin with
async fn delete_record(long_term: &LongTermMemory, id: RecordId) -> CliResult<bool> {
    match long_term.delete(id).await {
        Ok(()) => Ok(true),
        Err(HohenheimError::NotFound(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn record_json(record: &MemoryRecord) -> serde_json::Value {
    serde_json::json!({
        "id": record.id,
        "kind": record.kind,
        "content": &record.content,
        "importance": record.importance,
        "timestamp": record.timestamp.to_rfc3339(),
        "metadata": &record.metadata,
    })
}

fn search_table(results: &[ScoredRecord]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(["Score", "Kind", "Content", "Importance", "Created"]);

    for result in results {
        table.add_row([
            format!("{:.3}", result.score),
            result.record.kind.to_string(),
            truncate_string(&single_line(&result.record.content), 60),
            format!("{:.2}", result.record.importance),
            format_timestamp(&result.record.timestamp),
        ]);
    }
    table
}
