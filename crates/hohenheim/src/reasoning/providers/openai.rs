//! OpenAI-compatible chat completion backend
//!
//! Serves the hosted basic tier and local LM-Studio style servers alike. The
//! bearer header is only sent when a key is configured.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ApiKey, DEFAULT_SYSTEM_PROMPT, endpoint, send_with_retry};
use crate::config::TierConfig;
use crate::reasoning::{BackendError, GenerationParams, ReasoningBackend, format_prompt};

#[derive(Debug)]
pub struct OpenAiCompatibleBackend {
    client: Client,
    name: String,
    url: String,
    api_key_env: Option<String>,
    retry_delay: Duration,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleBackend {
    pub fn new(name: &str, config: &TierConfig, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Http(e.to_string()))?;

        info!(
            "{} backend initialized with model: {}, api_url: {}",
            name, config.model, config.api_url
        );

        Ok(Self {
            client,
            name: name.to_string(),
            url: endpoint(&config.api_url, "chat/completions"),
            api_key_env: config.api_key_env.clone(),
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Override the initial backoff used when rate limited
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[async_trait]
impl ReasoningBackend for OpenAiCompatibleBackend {
    async fn generate(
        &self,
        query: &str,
        context: &[String],
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        let api_key = ApiKey::from_env(self.api_key_env.as_deref());
        let api_key = api_key.require()?;
        let prompt = format_prompt(query, context);
        let system = params.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);

        let request = ChatCompletionRequest {
            model: &params.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        debug!("Calling chat completions at: {}", self.url);
        let response = send_with_retry(
            || {
                let builder = self.client.post(&self.url).json(&request);
                match api_key {
                    Some(key) => builder.bearer_auth(key),
                    None => builder,
                }
            },
            self.retry_delay,
        )
        .await?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(BackendError::EmptyResponse)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
