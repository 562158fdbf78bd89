//! Integration tests for tier selection, fallback, deadlines and cancellation

use std::sync::Arc;
use std::time::Duration;

use hohenheim::HohenheimError;
use hohenheim::config::MemoryConfig;
use hohenheim::memory::{LongTermMemory, MemoryCoordinator, RecordKind, ShortTermMemory};
use hohenheim::memory::importance::FAILED_KEY;
use hohenheim::reasoning::{
    BackendError, CancelSignal, DispatchState, ExchangeStatus, GenerationParams,
    ReasoningDispatcher, ReasoningMode, ReasoningRequest, Tier,
};
use hohenheim::storage::InMemoryIndex;
use hohenheim::testing::{MockEmbedder, ScriptedBackend};

// =============================================================================
// Test Fixtures
// =============================================================================

fn coordinator() -> Arc<MemoryCoordinator> {
    let long_term = Arc::new(LongTermMemory::new(Arc::new(InMemoryIndex::new()), 3));
    Arc::new(MemoryCoordinator::new(
        long_term,
        Arc::new(MockEmbedder::new()),
        MemoryConfig::default(),
        Duration::from_secs(5),
    ))
}

struct Backends {
    basic: Arc<ScriptedBackend>,
    advanced: Arc<ScriptedBackend>,
    local: Arc<ScriptedBackend>,
}

fn dispatcher(timeout: Duration) -> (ReasoningDispatcher, Backends) {
    let backends = Backends {
        basic: Arc::new(ScriptedBackend::new("deepseek")),
        advanced: Arc::new(ScriptedBackend::new("claude")),
        local: Arc::new(ScriptedBackend::new("lmstudio")),
    };
    let dispatcher = ReasoningDispatcher::new(coordinator(), timeout)
        .with_backend(Tier::Basic, backends.basic.clone(), GenerationParams::default())
        .with_backend(Tier::Advanced, backends.advanced.clone(), GenerationParams::default())
        .with_backend(Tier::Unrestricted, backends.local.clone(), GenerationParams::default());
    (dispatcher, backends)
}

fn request(tier: Tier) -> ReasoningRequest {
    ReasoningRequest {
        query: "explain ownership".to_string(),
        tier,
        context: vec!["User is new to Rust".to_string()],
    }
}

fn api_error() -> BackendError {
    BackendError::Api {
        status: 500,
        message: "internal".to_string(),
    }
}

mod fallback_tests {
    use super::*;

    #[tokio::test]
    async fn test_advanced_failure_falls_back_to_basic() {
        let (dispatcher, b) = dispatcher(Duration::from_secs(5));
        b.advanced.push_err(api_error());

        let result = dispatcher
            .invoke(&request(Tier::Advanced), &CancelSignal::new())
            .await;

        assert!(result.is_success());
        assert_eq!(result.tier, Some(Tier::Basic));
        assert_eq!(result.backend.as_deref(), Some("deepseek"));
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.failures(), 1);
        assert!(!result.attempts[0].succeeded());
        assert!(result.attempts[1].succeeded());
    }

    #[tokio::test]
    async fn test_basic_failure_falls_back_to_advanced() {
        let (dispatcher, b) = dispatcher(Duration::from_secs(5));
        b.basic.push_err(BackendError::Http("connection reset".to_string()));

        let result = dispatcher
            .invoke(&request(Tier::Basic), &CancelSignal::new())
            .await;

        assert_eq!(result.tier, Some(Tier::Advanced));
        assert_eq!(b.advanced.calls(), 1);
    }

    #[tokio::test]
    async fn test_at_most_one_fallback() {
        let (dispatcher, b) = dispatcher(Duration::from_secs(5));
        b.basic.fail_always(api_error());
        b.advanced.fail_always(api_error());

        let result = dispatcher
            .invoke(&request(Tier::Basic), &CancelSignal::new())
            .await;

        assert_eq!(result.status, ExchangeStatus::Failed);
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(b.basic.calls(), 1);
        assert_eq!(b.advanced.calls(), 1);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_unrestricted_never_falls_back() {
        let (dispatcher, b) = dispatcher(Duration::from_secs(5));
        b.local.push_err(BackendError::Http("connection refused".to_string()));

        let result = dispatcher
            .invoke(&request(Tier::Unrestricted), &CancelSignal::new())
            .await;

        assert!(!result.is_success());
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(b.basic.calls(), 0);
        assert_eq!(b.advanced.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_tier_falls_back() {
        let basic = Arc::new(ScriptedBackend::new("deepseek"));
        let dispatcher = ReasoningDispatcher::new(coordinator(), Duration::from_secs(5))
            .with_backend(Tier::Basic, basic.clone(), GenerationParams::default());

        let result = dispatcher
            .invoke(&request(Tier::Advanced), &CancelSignal::new())
            .await;

        assert!(result.is_success());
        assert_eq!(result.attempts[0].backend, "none");
        assert_eq!(basic.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_reply_counts_as_failure() {
        let (dispatcher, b) = dispatcher(Duration::from_secs(5));
        b.advanced.push_ok("   ");

        let result = dispatcher
            .invoke(&request(Tier::Advanced), &CancelSignal::new())
            .await;

        assert_eq!(result.tier, Some(Tier::Basic));
        assert_eq!(
            result.attempts[0].error.as_deref(),
            Some(BackendError::EmptyResponse.to_string().as_str())
        );
    }
}

mod deadline_tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_does_not_fall_back() {
        let (dispatcher, b) = dispatcher(Duration::from_millis(50));
        b.advanced.push_hang();

        let result = dispatcher
            .invoke(&request(Tier::Advanced), &CancelSignal::new())
            .await;

        assert!(!result.is_success());
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(b.basic.calls(), 0);
        assert!(!result.cancelled);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_call() {
        let (dispatcher, b) = dispatcher(Duration::from_secs(30));
        b.basic.push_hang();

        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            dispatcher.invoke(&request(Tier::Basic), &cancel),
        )
        .await
        .expect("cancellation should end the call");

        assert!(result.cancelled);
        assert_eq!(result.status, ExchangeStatus::Failed);
        assert_eq!(b.advanced.calls(), 0);
    }
}

mod reason_tests {
    use super::*;

    #[tokio::test]
    async fn test_reason_records_success() {
        let (dispatcher, b) = dispatcher(Duration::from_secs(5));
        b.basic.push_ok("Ownership means one owner.");
        let mut stm = ShortTermMemory::new(10).unwrap();

        let outcome = dispatcher
            .reason(
                &mut stm,
                "explain ownership",
                false,
                ReasoningMode::default(),
                &CancelSignal::new(),
            )
            .await;

        assert!(outcome.result.is_success());
        assert_eq!(
            outcome.result.transitions,
            vec![
                DispatchState::Received,
                DispatchState::ContextAssembled,
                DispatchState::BackendSelected,
                DispatchState::BackendInvoked,
                DispatchState::Completed,
            ]
        );
        let record = stm.get(&outcome.record.id).unwrap();
        assert_eq!(record.kind, RecordKind::Interaction);
        assert!(record.content.contains("Ownership means one owner."));
        assert!(!record.metadata.contains_key(FAILED_KEY));
    }

    #[tokio::test]
    async fn test_reason_records_failure() {
        let (dispatcher, b) = dispatcher(Duration::from_secs(5));
        b.basic.fail_always(api_error());
        b.advanced.fail_always(api_error());
        let mut stm = ShortTermMemory::new(10).unwrap();

        let outcome = dispatcher
            .reason(
                &mut stm,
                "explain ownership",
                false,
                ReasoningMode::default(),
                &CancelSignal::new(),
            )
            .await;

        assert!(!outcome.result.is_success());
        assert!(matches!(
            outcome.result.output(),
            Err(HohenheimError::ReasoningUnavailable(BackendError::Api { status: 500, .. }))
        ));
        let record = stm.get(&outcome.record.id).unwrap();
        assert!(record.metadata.contains_key(FAILED_KEY));
        assert!(record.content.contains("could not complete"));
    }

    #[tokio::test]
    async fn test_unrestricted_mode_overrides_advanced_flag() {
        let (dispatcher, b) = dispatcher(Duration::from_secs(5));
        let mut stm = ShortTermMemory::new(10).unwrap();

        let outcome = dispatcher
            .reason(
                &mut stm,
                "anything",
                true,
                ReasoningMode { unrestricted: true },
                &CancelSignal::new(),
            )
            .await;

        assert_eq!(outcome.result.tier, Some(Tier::Unrestricted));
        assert_eq!(b.local.calls(), 1);
        assert_eq!(b.advanced.calls(), 0);
    }

    #[tokio::test]
    async fn test_context_passed_to_backend() {
        let (dispatcher, b) = dispatcher(Duration::from_secs(5));
        let mut stm = ShortTermMemory::new(10).unwrap();
        stm.append(hohenheim::memory::MemoryRecord::new(
            RecordKind::Interaction,
            "User: I use vim",
        ));

        dispatcher
            .reason(
                &mut stm,
                "which editor",
                false,
                ReasoningMode::default(),
                &CancelSignal::new(),
            )
            .await;

        assert_eq!(b.basic.last_context(), vec!["User: I use vim".to_string()]);
    }
}
