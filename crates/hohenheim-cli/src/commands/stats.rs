use std::collections::BTreeMap;

use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use hohenheim::config::Config;
use hohenheim::memory::{MemoryRecord, RecordKind};
use serde::Serialize;

use super::open_long_term;
use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp};

#[derive(Parser)]
pub struct StatsCommand {}

#[derive(Debug, Serialize)]
pub struct LongTermStats {
    pub total: usize,
    pub by_kind: BTreeMap<RecordKind, usize>,
    pub average_importance: f32,
    pub oldest: Option<String>,
    pub newest: Option<String>,
}

impl LongTermStats {
    pub fn from_records(records: &[MemoryRecord]) -> Self {
        let mut by_kind: BTreeMap<RecordKind, usize> =
            RecordKind::ALL.iter().map(|k| (*k, 0)).collect();
        for record in records {
            *by_kind.entry(record.kind).or_default() += 1;
        }

        let average_importance = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.importance).sum::<f32>() / records.len() as f32
        };

        Self {
            total: records.len(),
            by_kind,
            average_importance,
            oldest: records.iter().map(|r| r.timestamp).min().map(|t| format_timestamp(&t)),
            newest: records.iter().map(|r| r.timestamp).max().map(|t| format_timestamp(&t)),
        }
    }
}

impl StatsCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> CliResult<()> {
        let long_term = open_long_term(config).await?;
        let total = long_term.count().await?;
        let records = long_term.list(total).await?;
        let stats = LongTermStats::from_records(&records);

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "path": config.storage.vector_db_path(),
                    "stats": stats,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                println!("Hohenheim Long-Term Memory");
                println!("==========================\n");
                println!("Store: {}\n", config.storage.vector_db_path().display());

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Kind", "Count"]);

                for (kind, count) in &stats.by_kind {
                    table.add_row([kind.to_string(), count.to_string()]);
                }

                println!("{table}\n");
                println!("Total: {} memories", stats.total);
                println!("Average importance: {:.2}", stats.average_importance);
                if let (Some(oldest), Some(newest)) = (&stats.oldest, &stats.newest) {
                    println!("Range: {oldest} .. {newest}");
                }
            }
        }

        Ok(())
    }
}
