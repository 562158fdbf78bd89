use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    Attempt, BackendError, CancelSignal, DispatchState, ExchangeStatus, GenerationParams,
    ReasoningBackend, ReasoningMode, ReasoningRequest, ReasoningResult, Tier,
};
use crate::memory::importance::FAILED_KEY;
use crate::memory::types::SOURCE_KEY;
use crate::memory::{
    AssembledContext, MemoryCoordinator, MemoryRecord, RecordKind, RecordOutcome, ShortTermMemory,
};

/// Everything produced by one pass through the dispatcher
#[derive(Debug)]
pub struct ReasoningOutcome {
    pub result: ReasoningResult,
    pub context: AssembledContext,
    /// The interaction record written back to short-term memory
    pub record: RecordOutcome,
}

struct TierBackend {
    backend: Arc<dyn ReasoningBackend>,
    params: GenerationParams,
}

/// Selects a tier, assembles context, invokes the backend and records the
/// exchange.
pub struct ReasoningDispatcher {
    coordinator: Arc<MemoryCoordinator>,
    backends: HashMap<Tier, TierBackend>,
    timeout: Duration,
}

impl ReasoningDispatcher {
    pub fn new(coordinator: Arc<MemoryCoordinator>, timeout: Duration) -> Self {
        Self {
            coordinator,
            backends: HashMap::new(),
            timeout,
        }
    }

    pub fn with_backend(
        mut self,
        tier: Tier,
        backend: Arc<dyn ReasoningBackend>,
        params: GenerationParams,
    ) -> Self {
        self.backends.insert(tier, TierBackend { backend, params });
        self
    }

    /// Static tier lookup. Unrestricted mode overrides everything else.
    pub fn select_tier(advanced: bool, mode: ReasoningMode) -> Tier {
        match (mode.unrestricted, advanced) {
            (true, _) => Tier::Unrestricted,
            (false, true) => Tier::Advanced,
            (false, false) => Tier::Basic,
        }
    }

    /// Configured tiers with their backend names
    pub fn configured_tiers(&self) -> Vec<(Tier, String)> {
        Tier::ALL
            .into_iter()
            .filter_map(|tier| {
                self.backends
                    .get(&tier)
                    .map(|b| (tier, b.backend.name().to_string()))
            })
            .collect()
    }

    pub fn coordinator(&self) -> &Arc<MemoryCoordinator> {
        &self.coordinator
    }

    /// Answer `query` for a session and append the exchange to its
    /// short-term memory, whether or not a backend succeeded.
    pub async fn reason(
        &self,
        stm: &mut ShortTermMemory,
        query: &str,
        advanced: bool,
        mode: ReasoningMode,
        cancel: &CancelSignal,
    ) -> ReasoningOutcome {
        let mut transitions = vec![DispatchState::Received];

        let memory = self.coordinator.config();
        let context = self
            .coordinator
            .assemble_context(stm, query, memory.context_short_term, memory.context_long_term)
            .await;
        transitions.push(DispatchState::ContextAssembled);

        let tier = Self::select_tier(advanced, mode);
        transitions.push(DispatchState::BackendSelected);
        debug!(%tier, entries = context.entries.len(), long_term = context.long_term_available, "Dispatching reasoning request");

        let request = ReasoningRequest {
            query: query.to_string(),
            tier,
            context: context.texts(),
        };
        let mut result = self.invoke(&request, cancel).await;
        transitions.append(&mut result.transitions);
        result.transitions = transitions;

        let record = self
            .coordinator
            .record(stm, exchange_record(&request, &result))
            .await;

        ReasoningOutcome {
            result,
            context,
            record,
        }
    }

    /// Invoke the backend for `request.tier`, falling back once to the other
    /// hosted tier. All attempts share one deadline.
    pub async fn invoke(&self, request: &ReasoningRequest, cancel: &CancelSignal) -> ReasoningResult {
        let deadline = Instant::now() + self.timeout;
        let mut attempts = Vec::new();
        let mut tier = request.tier;
        let mut fell_back = false;

        let last_error = loop {
            match self.attempt(tier, request, deadline, cancel).await {
                Ok((backend, text)) => {
                    attempts.push(Attempt {
                        tier,
                        backend: backend.clone(),
                        error: None,
                    });
                    info!(%tier, %backend, attempts = attempts.len(), "Reasoning completed");
                    return ReasoningResult {
                        text: Some(text),
                        tier: Some(tier),
                        backend: Some(backend),
                        status: ExchangeStatus::Completed,
                        attempts,
                        error: None,
                        cancelled: false,
                        transitions: vec![DispatchState::BackendInvoked, DispatchState::Completed],
                    };
                }
                Err((backend, error)) => {
                    warn!(%tier, %backend, %error, "Reasoning backend failed");
                    attempts.push(Attempt {
                        tier,
                        backend,
                        error: Some(error.to_string()),
                    });

                    if fell_back || cancel.is_cancelled() || !error.allows_fallback() {
                        break error;
                    }
                    match tier.fallback() {
                        Some(next) => {
                            info!(from = %tier, to = %next, "Falling back to other tier");
                            tier = next;
                            fell_back = true;
                        }
                        None => break error,
                    }
                }
            }
        };

        ReasoningResult {
            text: None,
            tier: None,
            backend: None,
            status: ExchangeStatus::Failed,
            attempts,
            cancelled: last_error == BackendError::Cancelled,
            error: Some(last_error),
            transitions: vec![DispatchState::BackendInvoked, DispatchState::Failed],
        }
    }

    async fn attempt(
        &self,
        tier: Tier,
        request: &ReasoningRequest,
        deadline: Instant,
        cancel: &CancelSignal,
    ) -> Result<(String, String), (String, BackendError)> {
        let Some(entry) = self.backends.get(&tier) else {
            return Err((
                "none".to_string(),
                BackendError::NotConfigured(format!("no backend for {tier} tier")),
            ));
        };
        let name = entry.backend.name().to_string();
        if cancel.is_cancelled() {
            return Err((name, BackendError::Cancelled));
        }

        let call = entry
            .backend
            .generate(&request.query, &request.context, &entry.params);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            result = tokio::time::timeout_at(deadline, call) => match result {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout),
            },
        };

        match outcome {
            Ok(text) if text.trim().is_empty() => Err((name, BackendError::EmptyResponse)),
            Ok(text) => Ok((name, text)),
            Err(e) => Err((name, e)),
        }
    }
}

/// Interaction record describing one exchange, success or not
fn exchange_record(request: &ReasoningRequest, result: &ReasoningResult) -> MemoryRecord {
    let answer = match (&result.text, &result.error) {
        (Some(text), _) => text.clone(),
        (None, Some(error)) => format!("(could not complete: {error})"),
        (None, None) => "(could not complete)".to_string(),
    };

    let mut record = MemoryRecord::new(
        RecordKind::Interaction,
        format!("User: {}\nAssistant: {}", request.query, answer),
    )
    .with_metadata(SOURCE_KEY, "reasoning")
    .with_metadata("requested_tier", request.tier.as_str())
    .with_metadata("attempts", result.attempts.len())
    .with_metadata("failures", result.failures())
    .with_metadata(
        "status",
        match result.status {
            ExchangeStatus::Completed => "completed",
            ExchangeStatus::Failed => "failed",
        },
    );

    if let (Some(tier), Some(backend)) = (result.tier, &result.backend) {
        record = record
            .with_metadata("tier", tier.as_str())
            .with_metadata("backend", backend.as_str());
    }
    if !result.is_success() {
        record = record.with_metadata(FAILED_KEY, true);
    }
    if result.cancelled {
        record = record.with_metadata("cancelled", true);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HohenheimError;

    #[test]
    fn test_select_tier_is_static() {
        let normal = ReasoningMode::default();
        let unrestricted = ReasoningMode { unrestricted: true };
        assert_eq!(ReasoningDispatcher::select_tier(false, normal), Tier::Basic);
        assert_eq!(ReasoningDispatcher::select_tier(true, normal), Tier::Advanced);
        assert_eq!(
            ReasoningDispatcher::select_tier(false, unrestricted),
            Tier::Unrestricted
        );
        assert_eq!(
            ReasoningDispatcher::select_tier(true, unrestricted),
            Tier::Unrestricted
        );
    }

    #[test]
    fn test_failed_exchange_record_is_tagged() {
        let request = ReasoningRequest {
            query: "why".to_string(),
            tier: Tier::Basic,
            context: Vec::new(),
        };
        let result = ReasoningResult {
            text: None,
            tier: None,
            backend: None,
            status: ExchangeStatus::Failed,
            attempts: Vec::new(),
            error: Some(BackendError::Timeout),
            cancelled: false,
            transitions: Vec::new(),
        };
        let record = exchange_record(&request, &result);
        assert!(record.metadata.contains_key(FAILED_KEY));
        assert!(record.content.contains("could not complete: Timed out"));
    }

    #[test]
    fn test_failed_result_surfaces_reasoning_unavailable() {
        let result = ReasoningResult {
            text: None,
            tier: None,
            backend: None,
            status: ExchangeStatus::Failed,
            attempts: Vec::new(),
            error: Some(BackendError::EmptyResponse),
            cancelled: false,
            transitions: Vec::new(),
        };
        match result.output() {
            Err(HohenheimError::ReasoningUnavailable(BackendError::EmptyResponse)) => {}
            other => panic!("unexpected output: {other:?}"),
        }
    }
}
