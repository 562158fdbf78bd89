//! HTTP reasoning backends
//!
//! - [`OpenAiCompatibleBackend`]: `/chat/completions` (DeepSeek, LM Studio)
//! - [`AnthropicBackend`]: `/messages`

pub mod anthropic;
pub mod openai;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use tracing::warn;

use super::{BackendError, ReasoningBackend};
use crate::config::{BackendProtocol, TierConfig};

pub use anthropic::AnthropicBackend;
pub use openai::OpenAiCompatibleBackend;

pub(crate) const DEFAULT_SYSTEM_PROMPT: &str = "You are Hohenheim, a personal assistant. Use the provided context when it is relevant and answer concisely.";

const MAX_RETRIES: u32 = 3;

/// Build the backend a tier's configuration describes
pub fn build_backend(
    name: &str,
    config: &TierConfig,
    timeout: Duration,
) -> Result<Arc<dyn ReasoningBackend>, BackendError> {
    Ok(match config.protocol {
        BackendProtocol::OpenAi => Arc::new(OpenAiCompatibleBackend::new(name, config, timeout)?),
        BackendProtocol::Anthropic => Arc::new(AnthropicBackend::new(name, config, timeout)?),
    })
}

/// Resolved API key, or the reason there is none
#[derive(Debug, Clone)]
pub(crate) enum ApiKey {
    Present(String),
    /// The configured variable is unset
    Missing(String),
    /// No key is required
    NotRequired,
}

impl ApiKey {
    pub(crate) fn from_env(var: Option<&str>) -> Self {
        match var {
            None => ApiKey::NotRequired,
            Some(var) => match env::var(var) {
                Ok(key) if !key.trim().is_empty() => ApiKey::Present(key),
                _ => ApiKey::Missing(var.to_string()),
            },
        }
    }

    /// The key to send, failing when one is required but absent
    pub(crate) fn require(&self) -> Result<Option<&str>, BackendError> {
        match self {
            ApiKey::Present(key) => Ok(Some(key)),
            ApiKey::NotRequired => Ok(None),
            ApiKey::Missing(var) => Err(BackendError::NotConfigured(format!(
                "API key env var '{var}' not set"
            ))),
        }
    }
}

pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// Send a request, retrying with exponential backoff on 429 and
/// transport errors. Non-success statuses other than 429 fail immediately.
pub(crate) async fn send_with_retry<F>(
    build: F,
    initial_delay: Duration,
) -> Result<Response, BackendError>
where
    F: Fn() -> RequestBuilder,
{
    let mut delay = initial_delay;
    let mut last_error = None;

    for attempt in 0..MAX_RETRIES {
        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.as_u16() == 429 {
                    warn!(
                        "Rate limited on attempt {}/{}, waiting {:?}",
                        attempt + 1,
                        MAX_RETRIES,
                        delay
                    );
                    last_error = Some(BackendError::Api {
                        status: 429,
                        message: "rate limited".to_string(),
                    });
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    continue;
                }

                if !status.is_success() {
                    let message = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    return Err(BackendError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }

                return Ok(response);
            }
            Err(e) => {
                if e.is_timeout() {
                    return Err(BackendError::Timeout);
                }
                let err_msg = e.to_string();
                last_error = Some(BackendError::Http(err_msg.clone()));
                if attempt < MAX_RETRIES - 1 {
                    warn!(
                        "Request failed on attempt {}/{}, retrying: {}",
                        attempt + 1,
                        MAX_RETRIES,
                        err_msg
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| BackendError::Http("Unknown error".to_string())))
}
