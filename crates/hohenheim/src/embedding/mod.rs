//! Text embedding providers
//!
//! [`FastEmbedProvider`] runs a local ONNX model through fastembed;
//! [`CachedEmbedder`] puts an LRU cache in front of any provider.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use lru::LruCache;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{HohenheimError, Result};

/// Maps text to a fixed-length vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Resolve a configured model name to a fastembed model and its dimension
pub fn resolve_model(name: &str) -> Result<(FastEmbedModel, usize)> {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
            Ok((FastEmbedModel::AllMiniLML6V2, 384))
        }
        "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => Ok((FastEmbedModel::BGESmallENV15, 384)),
        "multilingual-e5-small" | "intfloat/multilingual-e5-small" => {
            Ok((FastEmbedModel::MultilingualE5Small, 384))
        }
        other => Err(HohenheimError::Config(format!(
            "Unsupported embedding model: {other}"
        ))),
    }
}

/// The configured model, behind an LRU cache unless `cache_size` is 0
pub fn build_embedder(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let model_dir = config.storage.data_dir.join("models");
    let provider = FastEmbedProvider::new(&config.embedding.model, &model_dir)?;
    if provider.dimension() != config.embedding.dimension {
        return Err(HohenheimError::Config(format!(
            "embedding.dimension is {} but {} produces {}-dimensional vectors",
            config.embedding.dimension,
            config.embedding.model,
            provider.dimension()
        )));
    }

    let provider: Arc<dyn EmbeddingProvider> = Arc::new(provider);
    Ok(match NonZeroUsize::new(config.embedding.cache_size) {
        Some(capacity) => Arc::new(CachedEmbedder::new(provider, capacity)),
        None => provider,
    })
}

/// Local embedding model. Inference runs on the blocking thread pool.
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Load `model_name`, downloading it into `cache_dir` on first use
    pub fn new(model_name: &str, cache_dir: &Path) -> Result<Self> {
        let (model, dimension) = resolve_model(model_name)?;
        info!(model = model_name, "Loading embedding model");

        let options = InitOptions::new(model)
            .with_cache_dir(cache_dir.to_path_buf())
            .with_show_download_progress(false);
        let embedding = TextEmbedding::try_new(options)
            .map_err(|e| HohenheimError::EmbeddingFailed(format!("Failed to load model: {e}")))?;

        Ok(Self {
            model: Arc::new(Mutex::new(embedding)),
            model_name: model_name.to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();

        let embeddings = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| HohenheimError::EmbeddingFailed("Model lock poisoned".to_string()))?;
            model
                .embed(vec![text], None)
                .map_err(|e| HohenheimError::EmbeddingFailed(e.to_string()))
        })
        .await
        .map_err(|e| HohenheimError::EmbeddingFailed(format!("Embedding task failed: {e}")))??;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| HohenheimError::EmbeddingFailed("No embedding returned".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

/// LRU cache in front of another provider. Only successes are cached.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(text) {
                debug!("Embedding cache hit");
                return Ok(hit.clone());
            }
        }

        let vector = self.inner.embed(text).await?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(text.to_string(), vector.clone());
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingEmbedder, MockEmbedder};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_resolve_known_models() {
        let (_, dim) = resolve_model("all-MiniLM-L6-v2").unwrap();
        assert_eq!(dim, 384);
        assert!(resolve_model("BAAI/bge-small-en-v1.5").is_ok());
        assert!(matches!(
            resolve_model("text-embedding-3-large"),
            Err(HohenheimError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_requests() {
        let inner = Arc::new(MockEmbedder::new());
        let cached = CachedEmbedder::new(inner.clone(), NonZeroUsize::new(8).unwrap());

        let first = cached.embed("hello").await.unwrap();
        let second = cached.embed("hello").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_does_not_store_failures() {
        let cached = CachedEmbedder::new(Arc::new(FailingEmbedder), NonZeroUsize::new(8).unwrap());
        assert!(cached.embed("x").await.is_err());
        assert!(cached.is_empty());
    }

    #[tokio::test]
    async fn test_cache_evicts_least_recent() {
        let inner = Arc::new(MockEmbedder::new());
        let cached = CachedEmbedder::new(inner.clone(), NonZeroUsize::new(1).unwrap());

        cached.embed("a").await.unwrap();
        cached.embed("b").await.unwrap();
        cached.embed("a").await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }
}
