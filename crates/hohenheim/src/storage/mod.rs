//! Vector index abstraction backing long-term memory
//!
//! The index holds one row per promoted record: the full record payload plus
//! its embedding, so the index can always be rebuilt from its own rows.

pub mod lance;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::memory::types::{MemoryRecord, RecordId};

pub use lance::LanceIndex;
pub use memory::InMemoryIndex;

/// A single nearest-neighbour match
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub id: RecordId,
    /// Cosine similarity between the query and the stored vector
    pub score: f32,
    /// Stored payload, with `embedding` populated
    pub record: MemoryRecord,
}

/// Narrow interface to a nearest-neighbour store.
///
/// Every method must be safe to call concurrently from several sessions.
/// Failures are reported as `StorageUnavailable`.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the row for `id`
    async fn upsert(&self, id: RecordId, vector: &[f32], payload: &MemoryRecord) -> Result<()>;

    /// Up to `k` rows nearest to `vector`, best first
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>>;

    async fn get(&self, id: RecordId) -> Result<Option<MemoryRecord>>;

    /// Rewrite the stored importance. Returns false when `id` is absent.
    async fn update_importance(&self, id: RecordId, importance: f32) -> Result<bool>;

    /// Remove the row for `id`. Returns false when `id` is absent.
    async fn delete(&self, id: RecordId) -> Result<bool>;

    async fn count(&self) -> Result<usize>;

    /// Up to `limit` stored rows in no particular order
    async fn list(&self, limit: usize) -> Result<Vec<MemoryRecord>>;

    fn name(&self) -> &'static str;
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
