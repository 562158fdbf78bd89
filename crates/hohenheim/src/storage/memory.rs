//! Brute-force in-process index
//!
//! Used when no persistent store is configured or the Lance store cannot be
//! opened. Contents are lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{IndexHit, VectorIndex, cosine_similarity};
use crate::error::Result;
use crate::memory::types::{MemoryRecord, RecordId};

#[derive(Default)]
pub struct InMemoryIndex {
    rows: RwLock<HashMap<RecordId, MemoryRecord>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, id: RecordId, vector: &[f32], payload: &MemoryRecord) -> Result<()> {
        let mut row = payload.clone();
        row.id = id;
        row.embedding = Some(vector.to_vec());
        self.rows.write().await.insert(id, row);
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        let rows = self.rows.read().await;
        let mut hits: Vec<IndexHit> = rows
            .values()
            .filter_map(|record| {
                let embedding = record.embedding.as_deref()?;
                Some(IndexHit {
                    id: record.id,
                    score: cosine_similarity(vector, embedding),
                    record: record.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn get(&self, id: RecordId) -> Result<Option<MemoryRecord>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn update_importance(&self, id: RecordId, importance: f32) -> Result<bool> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&id) {
            Some(record) => {
                record.set_importance(importance);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: RecordId) -> Result<bool> {
        Ok(self.rows.write().await.remove(&id).is_some())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.rows.read().await.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        Ok(self.rows.read().await.values().take(limit).cloned().collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
