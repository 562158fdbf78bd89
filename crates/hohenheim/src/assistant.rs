//! The `submit` entry point used by every front-end
//!
//! One [`Assistant`] serves many sessions. Commands within a session run one
//! at a time in submission order; different sessions run concurrently and
//! share only long-term memory.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, StorageBackend};
use crate::embedding::build_embedder;
use crate::error::Result;
use crate::evolution::{BackendEvolution, EvolutionCapability, EvolutionError, EvolutionPatch};
use crate::memory::importance::FAILED_KEY;
use crate::memory::types::SOURCE_KEY;
use crate::memory::{
    AssembledContext, ContextEntry, ContextSource, LongTermMemory, MemoryCoordinator,
    MemoryRecord, Metadata, RecordKind, ShortTermStats,
};
use crate::reasoning::providers::build_backend;
use crate::reasoning::{
    CancelSignal, GenerationParams, ReasoningBackend, ReasoningDispatcher, ReasoningMode,
    ReasoningRequest, Tier,
};
use crate::storage::{InMemoryIndex, LanceIndex, VectorIndex};
use crate::router::{CommandRouter, Intent, SystemCommand};
use crate::session::{Session, SessionId};

const REFLECTION_PROMPT: &str = "Reflect on the recent conversation below. Summarise what you have learned about the user and their goals, and note anything worth remembering.";

/// Session-level settings taken from [`Config`]
#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub short_term_capacity: usize,
    pub start_unrestricted: bool,
    pub reflection_window: usize,
    pub recall_limit: usize,
}

impl AssistantSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            short_term_capacity: config.memory.short_term_capacity,
            start_unrestricted: config.reasoning.start_unrestricted,
            reflection_window: config.memory.reflection_window,
            recall_limit: config.memory.context_long_term,
        }
    }
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A memory shown to the user alongside a reply
#[derive(Debug, Clone, Serialize)]
pub struct RenderedMemory {
    pub source: ContextSource,
    pub kind: RecordKind,
    pub content: String,
    pub score: Option<f32>,
}

impl From<&ContextEntry> for RenderedMemory {
    fn from(entry: &ContextEntry) -> Self {
        Self {
            source: entry.source,
            kind: entry.kind,
            content: entry.content.clone(),
            score: entry.score,
        }
    }
}

/// Everything a front-end needs to render one reply
#[derive(Debug, Clone, Serialize)]
pub struct RenderableResult {
    pub session_id: SessionId,
    pub intent: &'static str,
    pub message: String,
    pub success: bool,
    pub tier: Option<Tier>,
    pub backend: Option<String>,
    pub memories: Vec<RenderedMemory>,
    pub long_term_available: bool,
    pub unrestricted: bool,
    /// The session was closed by this command
    pub exit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<EvolutionPatch>,
}

#[derive(Debug, Default)]
struct Reply {
    message: String,
    success: bool,
    tier: Option<Tier>,
    backend: Option<String>,
    memories: Vec<RenderedMemory>,
    long_term_unavailable: bool,
    exit: bool,
    patch: Option<EvolutionPatch>,
}

impl Reply {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: true,
            ..Self::default()
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: false,
            ..Self::default()
        }
    }
}

pub struct Assistant {
    router: CommandRouter,
    coordinator: Arc<MemoryCoordinator>,
    dispatcher: ReasoningDispatcher,
    evolution: Option<Arc<dyn EvolutionCapability>>,
    sessions: DashMap<SessionId, Arc<Mutex<Session>>>,
    settings: AssistantSettings,
}

impl Assistant {
    pub fn new(dispatcher: ReasoningDispatcher, settings: AssistantSettings) -> Self {
        Self {
            router: CommandRouter::new(),
            coordinator: Arc::clone(dispatcher.coordinator()),
            dispatcher,
            evolution: None,
            sessions: DashMap::new(),
            settings,
        }
    }

    /// Wire up storage, embeddings and backends from configuration.
    ///
    /// A long-term store that cannot be opened degrades to an in-memory
    /// index; a tier whose backend cannot be built is left unconfigured.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let index = open_index(config).await;
        let long_term = Arc::new(LongTermMemory::new(
            index,
            config.memory.candidate_multiplier,
        ));

        info!(model = %config.embedding.model, "Initializing embedding model (this may take a moment on first run)");
        let embedder = build_embedder(config)?;

        let coordinator = Arc::new(MemoryCoordinator::new(
            long_term,
            embedder,
            config.memory.clone(),
            Duration::from_secs(config.embedding.timeout_secs),
        ));

        let timeout = Duration::from_secs(config.reasoning.timeout_secs);
        let mut dispatcher = ReasoningDispatcher::new(Arc::clone(&coordinator), timeout);
        let mut built: Vec<(Tier, Arc<dyn ReasoningBackend>, GenerationParams)> = Vec::new();
        for tier in Tier::ALL {
            let tier_config = config.reasoning.tier(tier);
            match build_backend(tier.as_str(), tier_config, timeout) {
                Ok(backend) => {
                    info!(%tier, backend = backend.name(), url = %tier_config.api_url, "Configured reasoning backend");
                    let params = GenerationParams::from(tier_config);
                    built.push((tier, Arc::clone(&backend), params.clone()));
                    dispatcher = dispatcher.with_backend(tier, backend, params);
                }
                Err(e) => warn!(%tier, error = %e, "Reasoning tier left unconfigured"),
            }
        }

        let mut assistant = Self::new(dispatcher, AssistantSettings::from_config(config));
        if config.evolution.enabled {
            let evolution_backend = built
                .iter()
                .find(|(tier, _, _)| *tier == Tier::Advanced)
                .or_else(|| built.iter().find(|(tier, _, _)| *tier == Tier::Basic));
            if let Some((_, backend, params)) = evolution_backend {
                assistant = assistant.with_evolution(Arc::new(BackendEvolution::new(
                    Arc::clone(backend),
                    params.clone(),
                    timeout,
                )));
            }
        }
        Ok(assistant)
    }

    pub fn with_evolution(mut self, evolution: Arc<dyn EvolutionCapability>) -> Self {
        self.evolution = Some(evolution);
        self
    }

    pub fn coordinator(&self) -> &Arc<MemoryCoordinator> {
        &self.coordinator
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop a session and its short-term memory. Returns false if unknown.
    pub fn close_session(&self, id: &SessionId) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Up to `n` most recent short-term records of a session, newest first
    pub async fn recent(&self, id: &SessionId, n: usize) -> Option<Vec<MemoryRecord>> {
        let session = self.sessions.get(id).map(|s| Arc::clone(s.value()))?;
        let session = session.lock().await;
        Some(session.short_term.timeline(n))
    }

    pub async fn short_term_stats(&self, id: &SessionId) -> Option<ShortTermStats> {
        let session = self.sessions.get(id).map(|s| Arc::clone(s.value()))?;
        let session = session.lock().await;
        Some(session.short_term.stats())
    }

    /// Classify and execute one line of input for `session_id`
    pub async fn submit(&self, raw: &str, session_id: &SessionId) -> RenderableResult {
        self.submit_with_cancel(raw, session_id, &CancelSignal::new())
            .await
    }

    /// Like [`submit`](Self::submit), with a handle that aborts an in-flight
    /// backend call. The exchange is still recorded when cancelled.
    pub async fn submit_with_cancel(
        &self,
        raw: &str,
        session_id: &SessionId,
        cancel: &CancelSignal,
    ) -> RenderableResult {
        let intent = self.router.classify(raw);
        let intent_name = intent.name();

        let (reply, unrestricted) = loop {
            let handle = match self.session(session_id) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(session = %session_id, error = %e, "Could not open session");
                    return RenderableResult {
                        session_id: session_id.clone(),
                        intent: intent_name,
                        message: format!("Could not open session: {e}"),
                        success: false,
                        tier: None,
                        backend: None,
                        memories: Vec::new(),
                        long_term_available: false,
                        unrestricted: false,
                        exit: false,
                        patch: None,
                    };
                }
            };

            let mut session = handle.lock().await;
            if session.closed {
                // Exited while this command waited; the next lookup opens a fresh one.
                debug!(session = %session_id, "Session closed while waiting, reopening");
                continue;
            }
            if session.turns == 0 {
                info!(session = %session_id, "Session started");
                self.coordinator
                    .record(
                        &mut session.short_term,
                        system_event("session started"),
                    )
                    .await;
            }
            session.turns += 1;
            debug!(session = %session_id, intent = intent_name, turn = session.turns, "Handling command");

            let reply = self.handle(&mut session, intent, raw, cancel).await;
            if reply.exit {
                session.closed = true;
                self.sessions
                    .remove_if(session_id, |_, current| Arc::ptr_eq(current, &handle));
                info!(session = %session_id, "Session closed");
            }
            break (reply, session.mode.unrestricted);
        };

        RenderableResult {
            session_id: session_id.clone(),
            intent: intent_name,
            message: reply.message,
            success: reply.success,
            tier: reply.tier,
            backend: reply.backend,
            memories: reply.memories,
            long_term_available: !reply.long_term_unavailable,
            unrestricted,
            exit: reply.exit,
            patch: reply.patch,
        }
    }

    fn session(&self, id: &SessionId) -> Result<Arc<Mutex<Session>>> {
        let entry = self.sessions.entry(id.clone()).or_try_insert_with(|| {
            let mode = ReasoningMode {
                unrestricted: self.settings.start_unrestricted,
            };
            Session::new(id.clone(), self.settings.short_term_capacity, mode)
                .map(|s| Arc::new(Mutex::new(s)))
        })?;
        Ok(Arc::clone(entry.value()))
    }

    async fn handle(
        &self,
        session: &mut Session,
        intent: Intent,
        raw: &str,
        cancel: &CancelSignal,
    ) -> Reply {
        match intent {
            Intent::MemoryWrite { content } => self.remember(session, raw, &content).await,
            Intent::MemoryRead { query } => self.recall(session, raw, &query).await,
            Intent::ReasoningBasic { query } => self.reason(session, &query, false, cancel).await,
            Intent::ReasoningAdvanced { query } => self.reason(session, &query, true, cancel).await,
            Intent::Unrecognized { text } if text.is_empty() => {
                let reply = Reply::failed("Nothing to do. Type 'help' for the list of commands.");
                self.log_exchange(session, raw, &reply).await;
                reply
            }
            Intent::Unrecognized { text } => self.reason(session, &text, false, cancel).await,
            Intent::ModeToggle { unrestricted } => self.toggle_mode(session, unrestricted).await,
            Intent::EvolutionRequest { instruction } => {
                self.evolve(session, raw, &instruction).await
            }
            Intent::SystemCommand { command } => self.system(session, command, cancel).await,
        }
    }

    async fn remember(&self, session: &mut Session, raw: &str, content: &str) -> Reply {
        let reply = match self
            .coordinator
            .remember(&mut session.short_term, content, Metadata::new())
            .await
        {
            Ok(id) => {
                debug!(%id, "Remembered fact");
                Reply::ok("I'll remember that.")
            }
            Err(e) => {
                warn!(error = %e, "Could not persist fact");
                Reply {
                    long_term_unavailable: true,
                    ..Reply::failed(format!(
                        "I could not save that to long-term memory ({e}). I'll keep it for this session."
                    ))
                }
            }
        };
        self.log_exchange(session, raw, &reply).await;
        reply
    }

    async fn recall(&self, session: &mut Session, raw: &str, query: &str) -> Reply {
        let context = self
            .coordinator
            .recall(&session.short_term, query, self.settings.recall_limit)
            .await;

        let mut reply = if context.entries.is_empty() {
            Reply::ok(format!("I don't remember anything about {query}."))
        } else {
            let lines: Vec<String> = context
                .entries
                .iter()
                .enumerate()
                .map(|(i, e)| format!("{}. {}", i + 1, e.content))
                .collect();
            Reply::ok(format!("Here is what I remember:\n{}", lines.join("\n")))
        };
        reply.memories = context.entries.iter().map(RenderedMemory::from).collect();
        reply.long_term_unavailable = !context.long_term_available;

        self.log_exchange(session, raw, &reply).await;
        reply
    }

    async fn reason(
        &self,
        session: &mut Session,
        query: &str,
        advanced: bool,
        cancel: &CancelSignal,
    ) -> Reply {
        let outcome = self
            .dispatcher
            .reason(&mut session.short_term, query, advanced, session.mode, cancel)
            .await;
        let result = outcome.result;

        let mut reply = match result.output() {
            Ok(text) => Reply::ok(text),
            Err(e) => {
                debug!(session = %session.id, error = %e, "Reasoning request failed");
                Reply::failed(format!("I could not complete that request: {e}"))
            }
        };
        reply.tier = result.tier;
        reply.backend = result.backend;
        reply.memories = long_term_memories(&outcome.context);
        reply.long_term_unavailable = !outcome.context.long_term_available;
        reply
    }

    async fn toggle_mode(&self, session: &mut Session, requested: Option<bool>) -> Reply {
        let enable = requested.unwrap_or(!session.mode.unrestricted);
        session.mode.unrestricted = enable;

        let state = if enable { "enabled" } else { "disabled" };
        info!(session = %session.id, state, "Unrestricted mode toggled");
        self.coordinator
            .record(
                &mut session.short_term,
                system_event(&format!("unrestricted mode {state}")),
            )
            .await;

        let configured = self
            .dispatcher
            .configured_tiers()
            .iter()
            .any(|(tier, _)| *tier == Tier::Unrestricted);
        if enable && !configured {
            return Reply::ok(
                "Unrestricted mode enabled, but no local backend is configured. Requests will fail until one is.",
            );
        }
        Reply::ok(format!("Unrestricted mode {state}."))
    }

    async fn evolve(&self, session: &mut Session, raw: &str, instruction: &str) -> Reply {
        let result = match &self.evolution {
            Some(evolution) => evolution.propose(instruction).await,
            None => Err(EvolutionError::Disabled),
        };

        let reply = match result {
            Ok(patch) => Reply {
                backend: Some(patch.backend.clone()),
                patch: Some(patch.clone()),
                ..Reply::ok(format!(
                    "Proposed patch ({} lines). It has not been applied.\n{}",
                    patch.patch.lines().count(),
                    patch.explanation
                ))
            },
            Err(e) => Reply::failed(format!("Could not produce a patch: {e}")),
        };
        self.log_exchange(session, raw, &reply).await;
        reply
    }

    async fn system(&self, session: &mut Session, command: SystemCommand, cancel: &CancelSignal) -> Reply {
        match command {
            SystemCommand::Help => {
                let usage = self.router.usage().join("\n  ");
                self.note(session, "help requested").await;
                Reply::ok(format!(
                    "Commands:\n  {usage}\nAnything else is answered as a question."
                ))
            }
            SystemCommand::Status => {
                let reply = self.status(session).await;
                self.note(session, "status requested").await;
                reply
            }
            SystemCommand::Reset => {
                session.short_term.clear();
                self.note(session, "short-term memory reset").await;
                Reply::ok("Short-term memory cleared.")
            }
            SystemCommand::Exit => {
                self.note(session, "session ended").await;
                Reply {
                    exit: true,
                    ..Reply::ok("Goodbye.")
                }
            }
            SystemCommand::Reflect => self.reflect(session, cancel).await,
        }
    }

    async fn status(&self, session: &Session) -> Reply {
        let stats = session.short_term.stats();
        let long_term = self.coordinator.long_term();
        let (long_term_line, unavailable) = match long_term.count().await {
            Ok(count) => (format!("{count} records ({})", long_term.index_name()), false),
            Err(e) => (format!("unavailable ({e})"), true),
        };
        let tiers: Vec<String> = self
            .dispatcher
            .configured_tiers()
            .into_iter()
            .map(|(tier, name)| format!("{tier}={name}"))
            .collect();

        let message = format!(
            "Session: {} ({} turns)\nShort-term: {} records (capacity {} per kind)\nLong-term: {}\nUnrestricted mode: {}\nBackends: {}",
            session.id,
            session.turns,
            stats.total,
            stats.capacity,
            long_term_line,
            if session.mode.unrestricted { "on" } else { "off" },
            if tiers.is_empty() { "none".to_string() } else { tiers.join(", ") },
        );
        Reply {
            long_term_unavailable: unavailable,
            ..Reply::ok(message)
        }
    }

    async fn reflect(&self, session: &mut Session, cancel: &CancelSignal) -> Reply {
        let mut recent = session.short_term.timeline(self.settings.reflection_window);
        recent.retain(|r| r.kind != RecordKind::SystemEvent);
        if recent.is_empty() {
            self.note(session, "reflection skipped").await;
            return Reply::ok("Nothing to reflect on yet.");
        }
        recent.reverse();

        let request = ReasoningRequest {
            query: REFLECTION_PROMPT.to_string(),
            tier: ReasoningDispatcher::select_tier(false, session.mode),
            context: recent.into_iter().map(|r| r.content).collect(),
        };
        let result = self.dispatcher.invoke(&request, cancel).await;

        let text = match result.output() {
            Ok(text) => text.to_string(),
            Err(e) => {
                let reply = Reply::failed(format!("I could not reflect right now: {e}"));
                self.log_exchange(session, "reflect", &reply).await;
                return reply;
            }
        };

        let mut record = MemoryRecord::new(RecordKind::Reflection, text.clone())
            .with_metadata(SOURCE_KEY, "reflection");
        if let Some(backend) = &result.backend {
            record = record.with_metadata("backend", backend.as_str());
        }
        let outcome = self.coordinator.record(&mut session.short_term, record).await;

        let mut reply = Reply::ok(text);
        reply.tier = result.tier;
        reply.backend = result.backend;
        if let Some(e) = outcome.promotion_error {
            warn!(error = %e, "Reflection kept in short-term memory only");
            reply.long_term_unavailable = true;
        }
        reply
    }

    /// Record the command and its reply as an interaction
    async fn log_exchange(&self, session: &mut Session, raw: &str, reply: &Reply) {
        let mut record = MemoryRecord::new(
            RecordKind::Interaction,
            format!("User: {}\nAssistant: {}", raw.trim(), reply.message),
        )
        .with_metadata(SOURCE_KEY, "assistant");
        if !reply.success {
            record = record.with_metadata(FAILED_KEY, true);
        }
        self.coordinator.record(&mut session.short_term, record).await;
    }

    async fn note(&self, session: &mut Session, event: &str) {
        self.coordinator
            .record(&mut session.short_term, system_event(event))
            .await;
    }
}

async fn open_index(config: &Config) -> Arc<dyn VectorIndex> {
    match config.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory long-term store");
            Arc::new(InMemoryIndex::new())
        }
        StorageBackend::Lance => {
            let path = config.storage.vector_db_path();
            info!("Initializing storage at: {}", path.display());
            match LanceIndex::open(&path, config.embedding.dimension).await {
                Ok(index) => Arc::new(index),
                Err(e) => {
                    warn!(error = %e, "Long-term store unavailable, falling back to in-memory index");
                    Arc::new(InMemoryIndex::new())
                }
            }
        }
    }
}

fn system_event(event: &str) -> MemoryRecord {
    MemoryRecord::new(RecordKind::SystemEvent, event).with_metadata(SOURCE_KEY, "system")
}

fn long_term_memories(context: &AssembledContext) -> Vec<RenderedMemory> {
    context.long_term().map(RenderedMemory::from).collect()
}
