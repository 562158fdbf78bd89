pub mod chat;
pub mod config;
pub mod memory;
pub mod stats;

pub use chat::ChatCommand;
pub use config::ConfigCommand;
pub use memory::MemoryCommand;
pub use stats::StatsCommand;

use std::sync::Arc;

use hohenheim::config::{Config, StorageBackend};
use hohenheim::memory::LongTermMemory;
use hohenheim::storage::LanceIndex;

use crate::error::CliResult;

/// Open the on-disk long-term store directly, without the rest of the
/// assistant
pub(crate) async fn open_long_term(config: &Config) -> CliResult<LongTermMemory> {
    if config.storage.backend == StorageBackend::Memory {
        return Err("storage.backend is 'memory'; there is no persistent store to inspect".into());
    }
    let index = LanceIndex::open(&config.storage.vector_db_path(), config.embedding.dimension).await?;
    Ok(LongTermMemory::new(
        Arc::new(index),
        config.memory.candidate_multiplier,
    ))
}
