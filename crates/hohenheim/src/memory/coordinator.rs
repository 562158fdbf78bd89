//! Promotion and retrieval policy between the two stores
//!
//! Short-term memory is owned by a session and passed in by `&mut`, so the
//! caller's session lock already serialises access to it. Long-term memory is
//! shared; promotions take a per-record advisory lock for the duration of
//! embed + store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::importance::ImportanceScorer;
use super::long_term::{LongTermMemory, ScoredRecord};
use super::short_term::ShortTermMemory;
use super::types::{
    MemoryRecord, Metadata, MetadataValue, REMEMBER_KEY, RecordId, RecordKind, SOURCE_KEY,
};
use crate::config::MemoryConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{HohenheimError, Result};

/// Metadata key stamped on a record when it enters long-term memory
pub const PROMOTED_AT_KEY: &str = "promoted_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionOutcome {
    Promoted,
    /// The record was already in long-term memory; nothing was written
    AlreadyPromoted,
}

/// Result of [`MemoryCoordinator::record`]
#[derive(Debug)]
pub struct RecordOutcome {
    pub id: RecordId,
    pub promoted: bool,
    /// Set when the record was eligible but promotion failed. The record
    /// stays in short-term memory.
    pub promotion_error: Option<HohenheimError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextSource {
    ShortTerm,
    LongTerm,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextEntry {
    pub source: ContextSource,
    pub id: RecordId,
    pub kind: RecordKind,
    pub content: String,
    /// Similarity to the query, long-term entries only
    pub score: Option<f32>,
}

/// Context for one query: recent short-term block, then long-term matches
#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    pub entries: Vec<ContextEntry>,
    /// False when the long-term half could not be computed
    pub long_term_available: bool,
}

impl AssembledContext {
    pub fn texts(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.content.clone()).collect()
    }

    pub fn long_term(&self) -> impl Iterator<Item = &ContextEntry> {
        self.entries
            .iter()
            .filter(|e| e.source == ContextSource::LongTerm)
    }
}

pub struct MemoryCoordinator {
    long_term: Arc<LongTermMemory>,
    embedder: Arc<dyn EmbeddingProvider>,
    scorer: ImportanceScorer,
    config: MemoryConfig,
    io_timeout: Duration,
    promotion_locks: DashMap<RecordId, Arc<Mutex<()>>>,
}

impl MemoryCoordinator {
    pub fn new(
        long_term: Arc<LongTermMemory>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: MemoryConfig,
        io_timeout: Duration,
    ) -> Self {
        Self {
            long_term,
            embedder,
            scorer: ImportanceScorer::new(config.access_boost),
            config,
            io_timeout,
            promotion_locks: DashMap::new(),
        }
    }

    pub fn long_term(&self) -> &Arc<LongTermMemory> {
        &self.long_term
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn is_eligible(&self, record: &MemoryRecord) -> bool {
        record.importance >= self.config.promotion_threshold
    }

    /// Append a record to short-term memory, scoring it first, and promote it
    /// when it clears the threshold.
    pub async fn record(&self, stm: &mut ShortTermMemory, mut record: MemoryRecord) -> RecordOutcome {
        let scored = self.scorer.score(&record);
        if scored > record.importance {
            record.set_importance(scored);
        }
        let eligible = self.is_eligible(&record);
        let id = stm.append(record);

        if !eligible {
            return RecordOutcome {
                id,
                promoted: false,
                promotion_error: None,
            };
        }

        match self.promote(stm, id).await {
            Ok(_) => RecordOutcome {
                id,
                promoted: true,
                promotion_error: None,
            },
            Err(e) => {
                warn!(%id, error = %e, "Automatic promotion failed, record kept in short-term memory");
                RecordOutcome {
                    id,
                    promoted: false,
                    promotion_error: Some(e),
                }
            }
        }
    }

    /// Store a fact the user explicitly asked to keep and promote it
    pub async fn remember(
        &self,
        stm: &mut ShortTermMemory,
        content: &str,
        metadata: Metadata,
    ) -> Result<RecordId> {
        let mut record = MemoryRecord::new(RecordKind::Fact, content)
            .with_metadata(REMEMBER_KEY, true)
            .with_metadata(SOURCE_KEY, "user");
        for (key, value) in metadata {
            record.metadata.insert(key, value);
        }
        let importance = self.scorer.score(&record);
        record.set_importance(importance);

        let id = stm.append(record);
        self.promote(stm, id).await?;
        Ok(id)
    }

    /// Move a record from `stm` into long-term memory.
    ///
    /// The record leaves short-term memory only after the store succeeded.
    /// On any failure it stays where it was and the error is returned.
    pub async fn promote(
        &self,
        stm: &mut ShortTermMemory,
        id: RecordId,
    ) -> Result<PromotionOutcome> {
        let lock = Arc::clone(self.promotion_locks.entry(id).or_default().value());
        let result = {
            let _guard = lock.lock().await;
            self.promote_locked(stm, id).await
        };
        drop(lock);
        self.promotion_locks
            .remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn promote_locked(
        &self,
        stm: &mut ShortTermMemory,
        id: RecordId,
    ) -> Result<PromotionOutcome> {
        let Some(mut record) = stm.get(&id).cloned() else {
            return if self.long_term.contains(id).await? {
                debug!(%id, "Record already promoted");
                Ok(PromotionOutcome::AlreadyPromoted)
            } else {
                Err(HohenheimError::NotFound(format!("record {id}")))
            };
        };

        debug!(%id, kind = %record.kind, importance = record.importance, "Promoting record");
        let embedding = self.embed_with_timeout(&record.content).await?;

        record.metadata.insert(
            PROMOTED_AT_KEY.to_string(),
            MetadataValue::Text(Utc::now().to_rfc3339()),
        );
        record.embedding = Some(embedding.clone());

        match tokio::time::timeout(self.io_timeout, self.long_term.store(&record, &embedding)).await
        {
            Ok(stored) => {
                stored?;
            }
            Err(_) => {
                return Err(HohenheimError::StorageUnavailable(
                    "Timed out writing to long-term memory".to_string(),
                ));
            }
        }

        stm.remove(&id);
        info!(%id, kind = %record.kind, "Promoted record to long-term memory");
        Ok(PromotionOutcome::Promoted)
    }

    /// Long-term search for `query`, degrading to a short-term substring
    /// search when the long-term side cannot answer.
    pub async fn recall(
        &self,
        stm: &ShortTermMemory,
        query: &str,
        k: usize,
    ) -> AssembledContext {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();

        let long_term_available = match self.search_long_term(query, k).await {
            Ok(hits) => {
                let used: Vec<ScoredRecord> = hits
                    .into_iter()
                    .filter(|hit| seen.insert(normalize(&hit.record.content)))
                    .collect();
                self.reinforce(&used).await;
                entries.extend(used.into_iter().map(long_term_entry));
                true
            }
            Err(e) => {
                warn!(error = %e, "Long-term recall unavailable, searching short-term memory only");
                false
            }
        };

        for record in stm.search(query, None, k) {
            if entries.len() >= k {
                break;
            }
            if record.kind != RecordKind::SystemEvent && seen.insert(normalize(&record.content)) {
                entries.push(short_term_entry(&record));
            }
        }

        AssembledContext {
            entries,
            long_term_available,
        }
    }

    /// Build reasoning context: the `short_term_n` most recent short-term
    /// records in chronological order, then up to `long_term_k` long-term
    /// matches by descending score, minus near-duplicates.
    pub async fn assemble_context(
        &self,
        stm: &ShortTermMemory,
        query: &str,
        short_term_n: usize,
        long_term_k: usize,
    ) -> AssembledContext {
        let mut short_block: Vec<ContextEntry> = stm
            .timeline(stm.len())
            .into_iter()
            .filter(|r| r.kind != RecordKind::SystemEvent)
            .take(short_term_n)
            .map(|r| short_term_entry(&r))
            .collect();
        short_block.reverse();

        let mut seen: HashSet<String> = short_block.iter().map(|e| normalize(&e.content)).collect();
        let mut entries = short_block;

        if long_term_k == 0 {
            return AssembledContext {
                entries,
                long_term_available: true,
            };
        }

        let fetch = long_term_k.saturating_add(entries.len());
        let long_term_available = match self.search_long_term(query, fetch).await {
            Ok(hits) => {
                let used: Vec<ScoredRecord> = hits
                    .into_iter()
                    .filter(|hit| seen.insert(normalize(&hit.record.content)))
                    .take(long_term_k)
                    .collect();
                self.reinforce(&used).await;
                entries.extend(used.into_iter().map(long_term_entry));
                true
            }
            Err(e) => {
                warn!(error = %e, "Long-term context unavailable, continuing with short-term only");
                false
            }
        };

        AssembledContext {
            entries,
            long_term_available,
        }
    }

    async fn search_long_term(&self, query: &str, k: usize) -> Result<Vec<ScoredRecord>> {
        let embedding = self.embed_with_timeout(query).await?;
        match tokio::time::timeout(
            self.io_timeout,
            self.long_term
                .search(&embedding, k, self.config.min_similarity),
        )
        .await
        {
            Ok(results) => results,
            Err(_) => Err(HohenheimError::StorageUnavailable(
                "Timed out searching long-term memory".to_string(),
            )),
        }
    }

    /// Apply the access boost to long-term hits that made it into a result.
    /// Best effort: failures and timeouts are logged and skipped.
    async fn reinforce(&self, used: &[ScoredRecord]) {
        for scored in used {
            let id = scored.record.id;
            let importance = self.scorer.reinforce(scored.record.importance);
            match tokio::time::timeout(
                self.io_timeout,
                self.long_term.update_importance(id, importance),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(%id, error = %e, "Failed to reinforce importance"),
                Err(_) => debug!(%id, "Timed out reinforcing importance"),
            }
        }
    }

    async fn embed_with_timeout(&self, text: &str) -> Result<Vec<f32>> {
        match tokio::time::timeout(self.io_timeout, self.embedder.embed(text)).await {
            Ok(result) => result,
            Err(_) => Err(HohenheimError::EmbeddingFailed(format!(
                "Timed out after {:?}",
                self.io_timeout
            ))),
        }
    }

    #[cfg(test)]
    fn inflight_locks(&self) -> usize {
        self.promotion_locks.len()
    }
}

fn long_term_entry(scored: ScoredRecord) -> ContextEntry {
    ContextEntry {
        source: ContextSource::LongTerm,
        id: scored.record.id,
        kind: scored.record.kind,
        content: scored.record.content,
        score: Some(scored.score),
    }
}

fn short_term_entry(record: &MemoryRecord) -> ContextEntry {
    ContextEntry {
        source: ContextSource::ShortTerm,
        id: record.id,
        kind: record.kind,
        content: record.content.clone(),
        score: None,
    }
}

/// Case-folded, whitespace-collapsed form used for duplicate detection
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
