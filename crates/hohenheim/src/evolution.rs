//! Code-evolution capability
//!
//! Turns a natural-language instruction into a proposed patch. Proposals are
//! returned to the caller only; nothing here touches the filesystem.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::reasoning::{GenerationParams, ReasoningBackend};

const EVOLUTION_PROMPT: &str = "Propose a change to the Hohenheim assistant's own source code for the instruction below. \
Respond with a short analysis followed by a single unified diff in a fenced code block.";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvolutionError {
    #[error("evolution is disabled")]
    Disabled,

    #[error("instruction is empty")]
    EmptyInstruction,

    #[error("backend failed: {0}")]
    Backend(String),

    #[error("response did not contain a patch")]
    NoPatch,
}

/// A proposed, unapplied change
#[derive(Debug, Clone, Serialize)]
pub struct EvolutionPatch {
    pub instruction: String,
    /// Language tag of the fenced block, if any
    pub language: Option<String>,
    pub patch: String,
    /// Backend text outside the patch
    pub explanation: String,
    pub backend: String,
}

#[async_trait]
pub trait EvolutionCapability: Send + Sync {
    async fn propose(&self, instruction: &str) -> Result<EvolutionPatch, EvolutionError>;
}

/// Asks a reasoning backend for a diff
pub struct BackendEvolution {
    backend: Arc<dyn ReasoningBackend>,
    params: GenerationParams,
    timeout: Duration,
}

impl BackendEvolution {
    pub fn new(backend: Arc<dyn ReasoningBackend>, params: GenerationParams, timeout: Duration) -> Self {
        Self {
            backend,
            params,
            timeout,
        }
    }
}

#[async_trait]
impl EvolutionCapability for BackendEvolution {
    async fn propose(&self, instruction: &str) -> Result<EvolutionPatch, EvolutionError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(EvolutionError::EmptyInstruction);
        }

        let params = GenerationParams {
            system_prompt: Some(EVOLUTION_PROMPT.to_string()),
            ..self.params.clone()
        };
        let response = tokio::time::timeout(
            self.timeout,
            self.backend.generate(instruction, &[], &params),
        )
        .await
        .map_err(|_| EvolutionError::Backend("timed out".to_string()))?
        .map_err(|e| EvolutionError::Backend(e.to_string()))?;

        let (language, patch, explanation) =
            extract_code_block(&response).ok_or(EvolutionError::NoPatch)?;
        info!(backend = self.backend.name(), bytes = patch.len(), "Evolution patch proposed");

        Ok(EvolutionPatch {
            instruction: instruction.to_string(),
            language,
            patch,
            explanation,
            backend: self.backend.name().to_string(),
        })
    }
}

/// First fenced block in `text` as (language, body, remaining prose)
pub fn extract_code_block(text: &str) -> Option<(Option<String>, String, String)> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let header_end = after_fence.find('\n')?;
    let language = after_fence[..header_end].trim();
    let body_start = open + 3 + header_end + 1;
    let close = text[body_start..].find("```")? + body_start;

    let body = text[body_start..close].trim_end().to_string();
    if body.trim().is_empty() {
        return None;
    }

    let explanation = format!("{}{}", &text[..open], &text[close + 3..])
        .trim()
        .to_string();
    let language = (!language.is_empty()).then(|| language.to_string());
    Some((language, body, explanation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;

    #[test]
    fn test_extract_code_block() {
        let text = "Here is the fix.\n```diff\n- old\n+ new\n```\nDone.";
        let (language, body, explanation) = extract_code_block(text).unwrap();
        assert_eq!(language.as_deref(), Some("diff"));
        assert_eq!(body, "- old\n+ new");
        assert_eq!(explanation, "Here is the fix.\n\nDone.");
    }

    #[test]
    fn test_extract_requires_closed_non_empty_block() {
        assert!(extract_code_block("no code").is_none());
        assert!(extract_code_block("```rust\nfn main() {}").is_none());
        assert!(extract_code_block("```\n\n```").is_none());
    }

    #[tokio::test]
    async fn test_propose_returns_patch() {
        let backend = Arc::new(ScriptedBackend::new("advanced"));
        backend.push_ok("Analysis.\n```diff\n+ line\n```");
        let evolution = BackendEvolution::new(backend, GenerationParams::default(), Duration::from_secs(1));

        let patch = evolution.propose("add logging").await.unwrap();
        assert_eq!(patch.patch, "+ line");
        assert_eq!(patch.backend, "advanced");
    }

    #[tokio::test]
    async fn test_propose_without_block_is_no_patch() {
        let backend = Arc::new(ScriptedBackend::new("advanced"));
        backend.push_ok("I would rather not.");
        let evolution = BackendEvolution::new(backend, GenerationParams::default(), Duration::from_secs(1));
        assert_eq!(evolution.propose("x").await.unwrap_err(), EvolutionError::NoPatch);
        assert_eq!(evolution.propose("  ").await.unwrap_err(), EvolutionError::EmptyInstruction);
    }
}
