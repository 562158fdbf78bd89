use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HohenheimError, Result};
use crate::reasoning::Tier;

/// Main configuration structure for Hohenheim
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Short-term buffer, promotion and retrieval policy
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Long-term store location and engine
    #[serde(default)]
    pub storage: StorageConfig,
    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Reasoning tiers and dispatch settings
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    /// HTTP submit surface
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub evolution: EvolutionConfig,
}

impl Config {
    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| HohenheimError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HohenheimError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Config files tried, in order, when no path is given
    pub fn default_paths() -> Vec<PathBuf> {
        [
            dirs::home_dir().map(|h| h.join(".hohenheim").join("config.toml")),
            dirs::config_dir().map(|c| c.join("hohenheim").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Load `path`, or the first existing default path, or the built-in
    /// defaults when none exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        for path in Self::default_paths() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(&path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Reject settings the core cannot run with. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        if self.memory.short_term_capacity == 0 {
            return Err(HohenheimError::Config(
                "memory.short_term_capacity must be a positive integer".to_string(),
            ));
        }
        if self.memory.candidate_multiplier == 0 {
            return Err(HohenheimError::Config(
                "memory.candidate_multiplier must be at least 1".to_string(),
            ));
        }
        check_unit_interval("memory.promotion_threshold", self.memory.promotion_threshold)?;
        check_unit_interval("memory.min_similarity", self.memory.min_similarity)?;
        check_unit_interval("memory.access_boost", self.memory.access_boost)?;
        if self.embedding.dimension == 0 {
            return Err(HohenheimError::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }
        if self.reasoning.timeout_secs == 0 {
            return Err(HohenheimError::Config(
                "reasoning.timeout_secs must be positive".to_string(),
            ));
        }
        // Long enough for a reasoning call plus embedding of the query and
        // of the recorded exchange.
        let needed = self
            .reasoning
            .timeout_secs
            .saturating_add(self.embedding.timeout_secs.saturating_mul(2));
        if self.server.request_timeout_secs <= needed {
            return Err(HohenheimError::Config(format!(
                "server.request_timeout_secs must exceed {needed} \
                 (reasoning.timeout_secs + 2 * embedding.timeout_secs), got {}",
                self.server.request_timeout_secs
            )));
        }
        for (name, tier) in [
            ("basic", &self.reasoning.basic),
            ("advanced", &self.reasoning.advanced),
            ("unrestricted", &self.reasoning.unrestricted),
        ] {
            url::Url::parse(&tier.api_url).map_err(|e| {
                HohenheimError::Config(format!("reasoning.{name}.api_url is invalid: {e}"))
            })?;
        }
        Ok(())
    }
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(HohenheimError::Config(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

/// Memory policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Records kept per kind in each session's short-term buffer
    #[serde(default = "default_short_term_capacity")]
    pub short_term_capacity: usize,
    /// Importance at or above which a record is promoted automatically
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: f32,
    /// Minimum cosine similarity for a long-term match to enter context
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// Recent short-term records included in every context
    #[serde(default = "default_context_short_term")]
    pub context_short_term: usize,
    /// Long-term matches appended to every context
    #[serde(default = "default_context_long_term")]
    pub context_long_term: usize,
    /// Oversampling factor for index queries before filtering
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// Importance added to a long-term record each time it is retrieved
    #[serde(default = "default_access_boost")]
    pub access_boost: f32,
    /// Timeline entries considered by the reflect command
    #[serde(default = "default_reflection_window")]
    pub reflection_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: default_short_term_capacity(),
            promotion_threshold: default_promotion_threshold(),
            min_similarity: default_min_similarity(),
            context_short_term: default_context_short_term(),
            context_long_term: default_context_long_term(),
            candidate_multiplier: default_candidate_multiplier(),
            access_boost: default_access_boost(),
            reflection_window: default_reflection_window(),
        }
    }
}

fn default_short_term_capacity() -> usize {
    1000
}

fn default_promotion_threshold() -> f32 {
    0.85
}

fn default_min_similarity() -> f32 {
    0.3
}

fn default_context_short_term() -> usize {
    5
}

fn default_context_long_term() -> usize {
    5
}

fn default_candidate_multiplier() -> usize {
    3
}

fn default_access_boost() -> f32 {
    0.02
}

fn default_reflection_window() -> usize {
    20
}

/// Which vector index engine backs long-term memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Lance,
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for all persisted data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub backend: StorageBackend,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: StorageBackend::default(),
        }
    }
}

impl StorageConfig {
    /// Directory holding the Lance tables
    pub fn vector_db_path(&self) -> PathBuf {
        self.data_dir.join("vector_db")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".hohenheim"))
        .unwrap_or_else(|| PathBuf::from(".hohenheim"))
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name, e.g. "all-MiniLM-L6-v2"
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Vector length produced by the model
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    /// Entries kept in the in-process embedding cache (0 disables it)
    #[serde(default = "default_embedding_cache_size")]
    pub cache_size: usize,
    /// Upper bound for a single embed or index call
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            cache_size: default_embedding_cache_size(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_embedding_dimension() -> usize {
    384
}

fn default_embedding_cache_size() -> usize {
    512
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

/// Wire protocol spoken by a reasoning backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendProtocol {
    /// `/chat/completions` (DeepSeek, LM Studio, OpenAI)
    OpenAi,
    /// `/messages`
    Anthropic,
}

/// Configuration for one reasoning tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub protocol: BackendProtocol,
    /// Base URL, the protocol path is appended
    pub api_url: String,
    /// Environment variable holding the API key (none for local servers)
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

/// Reasoning dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Deadline for one request, fallback included
    #[serde(default = "default_reasoning_timeout_secs")]
    pub timeout_secs: u64,
    /// Whether new sessions start in unrestricted mode
    #[serde(default)]
    pub start_unrestricted: bool,
    #[serde(default = "default_basic_tier")]
    pub basic: TierConfig,
    #[serde(default = "default_advanced_tier")]
    pub advanced: TierConfig,
    #[serde(default = "default_unrestricted_tier")]
    pub unrestricted: TierConfig,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_reasoning_timeout_secs(),
            start_unrestricted: false,
            basic: default_basic_tier(),
            advanced: default_advanced_tier(),
            unrestricted: default_unrestricted_tier(),
        }
    }
}

impl ReasoningConfig {
    pub fn tier(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::Basic => &self.basic,
            Tier::Advanced => &self.advanced,
            Tier::Unrestricted => &self.unrestricted,
        }
    }
}

fn default_reasoning_timeout_secs() -> u64 {
    120
}

fn default_basic_tier() -> TierConfig {
    TierConfig {
        protocol: BackendProtocol::OpenAi,
        api_url: "https://api.deepseek.com/v1".to_string(),
        api_key_env: Some("DEEPSEEK_API_KEY".to_string()),
        model: "deepseek-chat".to_string(),
        temperature: default_temperature(),
        max_tokens: default_max_tokens(),
        system_prompt: None,
    }
}

fn default_advanced_tier() -> TierConfig {
    TierConfig {
        protocol: BackendProtocol::Anthropic,
        api_url: "https://api.anthropic.com/v1".to_string(),
        api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
        model: "claude-3-7-sonnet-20250219".to_string(),
        temperature: default_temperature(),
        max_tokens: default_max_tokens(),
        system_prompt: None,
    }
}

fn default_unrestricted_tier() -> TierConfig {
    TierConfig {
        protocol: BackendProtocol::OpenAi,
        api_url: "http://localhost:1234/v1".to_string(),
        api_key_env: None,
        model: "local-model".to_string(),
        temperature: default_temperature(),
        max_tokens: 2000,
        system_prompt: None,
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8700")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Per-request timeout applied by the HTTP layer
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8700".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

/// Evolution capability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Accept evolution requests at all
    #[serde(default = "default_evolution_enabled")]
    pub enabled: bool,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            enabled: default_evolution_enabled(),
        }
    }
}

fn default_evolution_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.memory.short_term_capacity, 1000);
        assert_eq!(config.memory.promotion_threshold, 0.85);
        assert_eq!(config.memory.context_short_term, 5);
        assert_eq!(config.memory.candidate_multiplier, 3);
        assert_eq!(config.storage.backend, StorageBackend::Lance);
        assert_eq!(config.embedding.model, "all-MiniLM-L6-v2");
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.reasoning.basic.model, "deepseek-chat");
        assert_eq!(config.reasoning.advanced.protocol, BackendProtocol::Anthropic);
        assert!(config.reasoning.unrestricted.api_key_env.is_none());
        assert!(!config.reasoning.start_unrestricted);
        assert_eq!(config.server.listen_addr, "127.0.0.1:8700");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[memory]
short_term_capacity = 50
promotion_threshold = 0.5
min_similarity = 0.2

[storage]
data_dir = "/tmp/hohenheim"
backend = "memory"

[embedding]
model = "bge-small-en-v1.5"
cache_size = 0

[reasoning]
timeout_secs = 30
start_unrestricted = true

[reasoning.unrestricted]
protocol = "openai"
api_url = "http://192.168.1.47:1234/v1"
model = "dolphin"
max_tokens = 1000

[server]
listen_addr = "0.0.0.0:9000"
"#;

        let config = Config::from_toml_str(toml_str).expect("Failed to parse TOML");

        assert_eq!(config.memory.short_term_capacity, 50);
        assert_eq!(config.memory.promotion_threshold, 0.5);
        assert_eq!(config.memory.context_long_term, 5);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/hohenheim"));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(
            config.storage.vector_db_path(),
            PathBuf::from("/tmp/hohenheim/vector_db")
        );
        assert_eq!(config.embedding.model, "bge-small-en-v1.5");
        assert_eq!(config.embedding.cache_size, 0);
        assert_eq!(config.reasoning.timeout_secs, 30);
        assert!(config.reasoning.start_unrestricted);
        assert_eq!(config.reasoning.unrestricted.model, "dolphin");
        assert_eq!(config.reasoning.unrestricted.max_tokens, 1000);
        assert_eq!(config.reasoning.unrestricted.temperature, 0.7);
        // Untouched tiers keep their defaults
        assert_eq!(config.reasoning.basic.model, "deepseek-chat");
        assert_eq!(config.server.listen_addr, "0.0.0.0:9000");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = Config::from_toml_str("[memory]\nshort_term_capacity = 0\n").unwrap_err();
        assert!(matches!(err, HohenheimError::Config(_)));
    }

    #[test]
    fn test_negative_capacity_is_a_parse_error() {
        let err = Config::from_toml_str("[memory]\nshort_term_capacity = -3\n").unwrap_err();
        assert!(matches!(err, HohenheimError::Config(_)));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = Config::default();
        config.memory.promotion_threshold = 1.5;
        assert!(matches!(config.validate(), Err(HohenheimError::Config(_))));
    }

    #[test]
    fn test_request_timeout_must_cover_reasoning() {
        let mut config = Config::default();
        config.server.request_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(HohenheimError::Config(_))));

        config.server.request_timeout_secs =
            config.reasoning.timeout_secs + 2 * config.embedding.timeout_secs;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.request_timeout_secs"));

        config.server.request_timeout_secs += 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_tier_url_rejected() {
        let mut config = Config::default();
        config.reasoning.basic.api_url = "not a url".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reasoning.basic.api_url"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").expect("empty config is valid");
        assert_eq!(config.memory.short_term_capacity, 1000);
        assert_eq!(config.reasoning.advanced.model, "claude-3-7-sonnet-20250219");
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[memory]\nshort_term_capacity = 42\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.memory.short_term_capacity, 42);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(HohenheimError::Config(_))));
    }

    #[test]
    fn test_tier_lookup() {
        let config = Config::default();
        assert_eq!(config.reasoning.tier(Tier::Basic).model, "deepseek-chat");
        assert_eq!(
            config.reasoning.tier(Tier::Unrestricted).api_url,
            "http://localhost:1234/v1"
        );
    }
}
