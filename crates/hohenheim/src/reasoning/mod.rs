//! Reasoning tiers, backend interface and exchange types
//!
//! A request is answered by exactly one backend per attempt. The
//! [`ReasoningDispatcher`] decides which, and falls back between the two
//! hosted tiers at most once.

pub mod dispatcher;
pub mod providers;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;

use crate::config::TierConfig;
use crate::error::HohenheimError;

pub use dispatcher::{ReasoningDispatcher, ReasoningOutcome};

/// Reasoning backend class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Fast general-purpose hosted model
    Basic,
    /// Stronger hosted model for analysis and code
    Advanced,
    /// Local model used while unrestricted mode is on
    Unrestricted,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Basic, Tier::Advanced, Tier::Unrestricted];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Advanced => "advanced",
            Tier::Unrestricted => "unrestricted",
        }
    }

    /// The other hosted tier. Unrestricted has none.
    pub fn fallback(&self) -> Option<Tier> {
        match self {
            Tier::Basic => Some(Tier::Advanced),
            Tier::Advanced => Some(Tier::Basic),
            Tier::Unrestricted => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session reasoning mode, passed down explicitly with every request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReasoningMode {
    pub unrestricted: bool,
}

/// Errors from a single backend invocation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Timed out")]
    Timeout,

    #[error("Cancelled")]
    Cancelled,

    #[error("Empty response")]
    EmptyResponse,
}

impl BackendError {
    /// Whether the other hosted tier may be tried after this failure
    pub fn allows_fallback(&self) -> bool {
        !matches!(self, BackendError::Timeout | BackendError::Cancelled)
    }
}

/// Sampling parameters for one tier
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

impl From<&TierConfig> for GenerationParams {
    fn from(config: &TierConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            system_prompt: None,
        }
    }
}

/// A text-generation capability for one tier
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn generate(
        &self,
        query: &str,
        context: &[String],
        params: &GenerationParams,
    ) -> Result<String, BackendError>;

    fn name(&self) -> &str;
}

/// Caller-held handle for aborting an in-flight request
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    notify: Notify,
    cancelled: AtomicBool,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Lifecycle of one request through the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchState {
    Received,
    ContextAssembled,
    BackendSelected,
    BackendInvoked,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub query: String,
    pub tier: Tier,
    pub context: Vec<String>,
}

/// One backend call within an exchange
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub tier: Tier,
    pub backend: String,
    /// None on success
    pub error: Option<String>,
}

impl Attempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasoningResult {
    pub text: Option<String>,
    /// Tier that produced `text`
    pub tier: Option<Tier>,
    /// Backend that produced `text`
    pub backend: Option<String>,
    pub status: ExchangeStatus,
    pub attempts: Vec<Attempt>,
    /// Last failure, when the exchange failed
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<BackendError>,
    pub cancelled: bool,
    pub transitions: Vec<DispatchState>,
}

impl ReasoningResult {
    pub fn is_success(&self) -> bool {
        self.status == ExchangeStatus::Completed
    }

    pub fn failures(&self) -> usize {
        self.attempts.iter().filter(|a| !a.succeeded()).count()
    }

    /// The generated text, or `ReasoningUnavailable` with the last backend
    /// failure once fallback is exhausted.
    pub fn output(&self) -> crate::error::Result<&str> {
        match (&self.text, &self.error) {
            (Some(text), _) => Ok(text),
            (None, Some(error)) => Err(HohenheimError::ReasoningUnavailable(error.clone())),
            (None, None) => Err(HohenheimError::ReasoningUnavailable(
                BackendError::NotConfigured("no backend answered".to_string()),
            )),
        }
    }
}

fn serialize_error<S>(
    error: &Option<BackendError>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Render a query and its context as a single prompt
pub fn format_prompt(query: &str, context: &[String]) -> String {
    if context.is_empty() {
        return query.to_string();
    }

    let mut prompt = format!("Query: {query}\n\nRelevant context:\n");
    for (i, entry) in context.iter().enumerate() {
        prompt.push_str(&format!("  {}. {}\n", i + 1, entry));
    }
    prompt
}
