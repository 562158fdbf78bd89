//! Anthropic Messages API backend

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ApiKey, DEFAULT_SYSTEM_PROMPT, endpoint, send_with_retry};
use crate::config::TierConfig;
use crate::reasoning::{BackendError, GenerationParams, ReasoningBackend, format_prompt};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub struct AnthropicBackend {
    client: Client,
    name: String,
    url: String,
    api_key_env: Option<String>,
    retry_delay: Duration,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicBackend {
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
            url: endpoint(&config.api_url, "messages"),
            api_key_env: config.api_key_env.clone(),
            retry_delay: Duration::from_secs(1),
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[async_trait]
impl ReasoningBackend for AnthropicBackend {
    async fn generate(
        &self,
        query: &str,
        context: &[String],
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        let api_key = ApiKey::from_env(self.api_key_env.as_deref());
        let api_key = api_key.require()?;
        let prompt = format_prompt(query, context);

        let request = MessagesRequest {
            model: &params.model,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            system: params.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT),
            messages: vec![Message {
                role: "user",
                content: &prompt,
            }],
        };

        debug!("Calling messages API at: {}", self.url);
        let response = send_with_retry(
            || {
                let builder = self
                    .client
                    .post(&self.url)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&request);
                match api_key {
                    Some(key) => builder.header("x-api-key", key),
                    None => builder,
                }
            },
            self.retry_delay,
        )
        .await?;

        let message: MessagesResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        let text: String = message
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        let text = text.trim();
        if text.is_empty() {
            return Err(BackendError::EmptyResponse);
        }
        Ok(text.to_string())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
