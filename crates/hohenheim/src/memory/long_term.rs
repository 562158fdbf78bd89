//! Durable store of promoted records
//!
//! Thin policy layer over a [`VectorIndex`]: oversampled candidate fetch,
//! similarity cut-off and a total order over results.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, info};

use super::types::{MemoryRecord, RecordId};
use crate::error::{HohenheimError, Result};
use crate::storage::VectorIndex;

/// A long-term record with its similarity to the query
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub score: f32,
}

pub struct LongTermMemory {
    index: Arc<dyn VectorIndex>,
    candidate_multiplier: usize,
}

impl LongTermMemory {
    pub fn new(index: Arc<dyn VectorIndex>, candidate_multiplier: usize) -> Self {
        Self {
            index,
            candidate_multiplier: candidate_multiplier.max(1),
        }
    }

    pub fn index_name(&self) -> &'static str {
        self.index.name()
    }

    /// Persist `record` with `embedding`. Retrying with the same id replaces
    /// the earlier row.
    pub async fn store(&self, record: &MemoryRecord, embedding: &[f32]) -> Result<RecordId> {
        if embedding.is_empty() {
            return Err(HohenheimError::EmbeddingFailed(
                "Refusing to store an empty embedding".to_string(),
            ));
        }
        self.index.upsert(record.id, embedding, record).await?;
        debug!(id = %record.id, kind = %record.kind, "Stored long-term record");
        Ok(record.id)
    }

    /// Up to `k` records with `score >= min_score`, best first.
    ///
    /// Equal scores are ordered by importance, then by recency.
    pub async fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredRecord>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let candidates = self
            .index
            .query(query, k.saturating_mul(self.candidate_multiplier))
            .await?;

        let mut results: Vec<ScoredRecord> = candidates
            .into_iter()
            .filter(|hit| hit.score >= min_score)
            .map(|hit| ScoredRecord {
                record: hit.record,
                score: hit.score,
            })
            .collect();

        results.sort_by(compare_scored);
        results.truncate(k);
        Ok(results)
    }

    /// Overwrite the importance of a stored record
    pub async fn update_importance(&self, id: RecordId, score: f32) -> Result<()> {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        if self.index.update_importance(id, score).await? {
            Ok(())
        } else {
            Err(HohenheimError::NotFound(format!("long-term record {id}")))
        }
    }

    /// Permanently remove a stored record
    pub async fn delete(&self, id: RecordId) -> Result<()> {
        if self.index.delete(id).await? {
            info!(%id, "Deleted long-term record");
            Ok(())
        } else {
            Err(HohenheimError::NotFound(format!("long-term record {id}")))
        }
    }

    pub async fn get(&self, id: RecordId) -> Result<Option<MemoryRecord>> {
        self.index.get(id).await
    }

    pub async fn contains(&self, id: RecordId) -> Result<bool> {
        Ok(self.index.get(id).await?.is_some())
    }

    pub async fn count(&self) -> Result<usize> {
        self.index.count().await
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        self.index.list(limit).await
    }
}

fn compare_scored(a: &ScoredRecord, b: &ScoredRecord) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.record.importance.total_cmp(&a.record.importance))
        .then_with(|| b.record.timestamp.cmp(&a.record.timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::RecordKind;
    use crate::storage::InMemoryIndex;
    use crate::testing::FailingIndex;

    fn store() -> LongTermMemory {
        LongTermMemory::new(Arc::new(InMemoryIndex::new()), 3)
    }

    #[tokio::test]
    async fn test_search_empty_store_is_empty() {
        let ltm = store();
        let results = ltm.search(&[1.0, 0.0], 5, 0.0).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_delete_then_missing_is_not_found() {
        let ltm = store();
        let record = MemoryRecord::new(RecordKind::Fact, "temporary");
        ltm.store(&record, &[1.0, 0.0]).await.unwrap();

        ltm.delete(record.id).await.unwrap();
        assert!(!ltm.contains(record.id).await.unwrap());
        assert!(ltm.search(&[1.0, 0.0], 5, 0.0).await.unwrap().is_empty());

        let err = ltm.delete(record.id).await.unwrap_err();
        assert!(matches!(err, HohenheimError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_search_filters_by_min_score() {
        let ltm = store();
        let close = MemoryRecord::new(RecordKind::Fact, "close");
        let far = MemoryRecord::new(RecordKind::Fact, "far");
        ltm.store(&close, &[1.0, 0.0]).await.unwrap();
        ltm.store(&far, &[0.0, 1.0]).await.unwrap();

        let results = ltm.search(&[1.0, 0.0], 5, 0.5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id, close.id);
    }

    #[tokio::test]
    async fn test_ties_broken_by_importance_then_recency() {
        let ltm = store();
        let older_low = MemoryRecord::new(RecordKind::Fact, "a").with_importance(0.2);
        let older_high = MemoryRecord::new(RecordKind::Fact, "b").with_importance(0.8);
        let newer_high = MemoryRecord::new(RecordKind::Fact, "c").with_importance(0.8);
        for r in [&older_low, &older_high, &newer_high] {
            ltm.store(r, &[1.0, 1.0]).await.unwrap();
        }

        let order: Vec<_> = ltm
            .search(&[1.0, 1.0], 3, 0.0)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.record.content)
            .collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_update_importance_missing_is_not_found() {
        let ltm = store();
        let err = ltm.update_importance(RecordId::new(), 0.4).await.unwrap_err();
        assert!(matches!(err, HohenheimError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_importance_clamps() {
        let ltm = store();
        let record = MemoryRecord::new(RecordKind::Fact, "x").with_importance(0.5);
        ltm.store(&record, &[1.0]).await.unwrap();
        ltm.update_importance(record.id, 3.0).await.unwrap();
        let stored = ltm.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.importance, 1.0);
    }

    #[tokio::test]
    async fn test_store_surfaces_storage_unavailable() {
        let ltm = LongTermMemory::new(Arc::new(FailingIndex), 3);
        let record = MemoryRecord::new(RecordKind::Fact, "x");
        let err = ltm.store(&record, &[1.0]).await.unwrap_err();
        assert!(matches!(err, HohenheimError::StorageUnavailable(_)));
    }
}
