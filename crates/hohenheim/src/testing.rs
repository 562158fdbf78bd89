//! Test doubles for Hohenheim
//!
//! Deterministic stand-ins for the external collaborators, so memory and
//! dispatch logic can be tested without models, databases or network.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{HohenheimError, Result};
use crate::memory::types::{MemoryRecord, RecordId};
use crate::reasoning::{BackendError, GenerationParams, ReasoningBackend};
use crate::storage::{IndexHit, VectorIndex};

pub const MOCK_DIMENSION: usize = 384;

/// Deterministic hash-based embeddings. Identical text gives identical
/// vectors; different text gives unrelated ones.
#[derive(Debug, Default)]
pub struct MockEmbedder {
    pub calls: AtomicUsize,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering every request
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Switch between failing and working at runtime
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn vector(text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        (0..MOCK_DIMENSION)
            .map(|i| {
                let x = seed
                    .wrapping_mul(i as u64 + 1)
                    .wrapping_add(0x9e3779b97f4a7c15);
                let normalized = (x as f32) / (u64::MAX as f32);
                (normalized * 2.0) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(HohenheimError::EmbeddingFailed(
                "mock embedder set to fail".to_string(),
            ));
        }
        Ok(Self::vector(text))
    }

    fn dimension(&self) -> usize {
        MOCK_DIMENSION
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Always fails with `EmbeddingFailed`
#[derive(Debug, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(HohenheimError::EmbeddingFailed("embedding provider offline".to_string()))
    }

    fn dimension(&self) -> usize {
        MOCK_DIMENSION
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Index whose every operation fails with `StorageUnavailable`
#[derive(Debug, Default)]
pub struct FailingIndex;

#[async_trait]
impl VectorIndex for FailingIndex {
    async fn upsert(&self, _id: RecordId, _vector: &[f32], _payload: &MemoryRecord) -> Result<()> {
        Err(unavailable())
    }

    async fn query(&self, _vector: &[f32], _k: usize) -> Result<Vec<IndexHit>> {
        Err(unavailable())
    }

    async fn get(&self, _id: RecordId) -> Result<Option<MemoryRecord>> {
        Err(unavailable())
    }

    async fn update_importance(&self, _id: RecordId, _importance: f32) -> Result<bool> {
        Err(unavailable())
    }

    async fn delete(&self, _id: RecordId) -> Result<bool> {
        Err(unavailable())
    }

    async fn count(&self) -> Result<usize> {
        Err(unavailable())
    }

    async fn list(&self, _limit: usize) -> Result<Vec<MemoryRecord>> {
        Err(unavailable())
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

fn unavailable() -> HohenheimError {
    HohenheimError::StorageUnavailable("index offline".to_string())
}

#[derive(Debug)]
enum Step {
    Reply(String),
    Fail(BackendError),
    /// Never returns; used to exercise timeouts and cancellation
    Hang,
}

/// Backend that replays queued replies and failures in order, then answers
/// `"<name> response"` once the queue is empty.
#[derive(Debug)]
pub struct ScriptedBackend {
    name: String,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    last_context: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            steps: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            last_context: Mutex::new(Vec::new()),
        }
    }

    pub fn push_ok(&self, text: &str) {
        self.push(Step::Reply(text.to_string()));
    }

    pub fn push_err(&self, error: BackendError) {
        self.push(Step::Fail(error));
    }

    pub fn push_hang(&self) {
        self.push(Step::Hang);
    }

    /// Fail every call from now on
    pub fn fail_always(&self, error: BackendError) {
        for _ in 0..64 {
            self.push_err(error.clone());
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Context passed on the most recent call
    pub fn last_context(&self) -> Vec<String> {
        self.last_context
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn push(&self, step: Step) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push_back(step);
        }
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    async fn generate(
        &self,
        _query: &str,
        context: &[String],
        _params: &GenerationParams,
    ) -> std::result::Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_context.lock() {
            *last = context.to_vec();
        }

        let step = self.steps.lock().ok().and_then(|mut s| s.pop_front());
        match step {
            Some(Step::Reply(text)) => Ok(text),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Hang) => {
                std::future::pending::<()>().await;
                Err(BackendError::Timeout)
            }
            None => Ok(format!("{} response", self.name)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
