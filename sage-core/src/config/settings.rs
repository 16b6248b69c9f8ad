//! Settings configuration loaded from TOML files.
//!
//! This module handles non-sensitive configuration stored in TOML format
//! in the XDG config directory (~/.config/sage/config.toml).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::{EmbeddingProviderType, ProviderType, RetrievalMode};

/// Default TOML configuration file content
const DEFAULT_CONFIG_TOML: &str = r#"# sage configuration file
# Located at: ~/.config/sage/config.toml
#
# This file contains non-sensitive configuration.
# Secrets (API keys) are loaded from environment variables:
#   - OPENAI_API_KEY (or the variable named by generation.api_key_env)
#   - BRAVE_API_KEY

[generation]
# "openai_compatible" or "ollama"
provider = "openai_compatible"
model = "gpt-4o-mini"
# base_url = "http://127.0.0.1:8080/v1"
# api_key_env = "OPENAI_API_KEY"
max_tokens = 1000
summary_max_tokens = 250
temperature = 0.2
timeout_seconds = 120

[retrieval]
# "kb_then_external", "kb_only" or "external_only"
mode = "kb_then_external"
top_k = 4

[conversation]
history_depth = 20
summarize_threshold = 10
cancel_grace_ms = 1000

[knowledge]
embedding_provider = "ollama"
embedding_url = "http://127.0.0.1:11434"
embedding_model = "nomic-embed-text"
embedding_batch = 32
chunk_size = 1000
chunk_overlap = 200
# index_dir_override = "/var/lib/sage/knowledge"

[external]
cache_ttl_minutes = 15
timeout_seconds = 30

[external.wikipedia]
enabled = true
lang = "en"
max_chars = 4000

[external.brave]
enabled = true
max_results = 5
min_interval_ms = 1000

[logging]
level = "info"
"#;

/// Settings loaded from TOML configuration file.
///
/// These are non-sensitive configuration values that can be safely
/// stored in files and version controlled (excluding secrets).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    /// Answer generation backend
    #[serde(default)]
    pub generation: GenerationSettings,

    /// Retrieval strategy defaults
    #[serde(default)]
    pub retrieval: RetrievalSettings,

    /// Per-conversation history and single-flight tuning
    #[serde(default)]
    pub conversation: ConversationSettings,

    /// Knowledge index settings
    #[serde(default)]
    pub knowledge: KnowledgeSection,

    /// External search providers
    #[serde(default)]
    pub external: ExternalSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Generation backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationSettings {
    /// Provider type ("openai_compatible" or "ollama")
    #[serde(
        default,
        deserialize_with = "deserialize_provider",
        serialize_with = "serialize_provider"
    )]
    pub provider: ProviderType,
    /// Model identifier
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Base URL override (local OpenAI-compatible servers, remote Ollama).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Optional env var name used to resolve the provider API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Retrieval defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalSettings {
    /// Mode used when the caller does not pick one
    #[serde(default)]
    pub mode: RetrievalMode,
    /// Chunks pulled from the knowledge index per question
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

/// Conversation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversationSettings {
    /// Number of (question, answer) pairs kept per conversation.
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
    /// History length at which the conversation is collapsed into a digest.
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold: usize,
    /// How long a new question waits for the previous one to wind down.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

/// Knowledge index configuration (user-facing, all optional)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KnowledgeSection {
    /// Embedding backend
    pub embedding_provider: Option<EmbeddingProviderType>,

    /// Embedding provider base URL
    pub embedding_url: Option<String>,

    /// Embedding model name
    pub embedding_model: Option<String>,

    /// Embedding dimension (if known)
    pub embedding_dim: Option<usize>,

    /// Embedding batch size
    pub embedding_batch: Option<usize>,

    /// Target chunk size in characters
    pub chunk_size: Option<usize>,

    /// Characters shared between neighbouring chunks
    pub chunk_overlap: Option<usize>,

    /// Largest document accepted for indexing, in characters
    pub max_document_chars: Option<usize>,

    /// Optional override for the index directory
    pub index_dir_override: Option<String>,
}

/// External search configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExternalSettings {
    #[serde(default = "default_external_cache_ttl_minutes")]
    pub cache_ttl_minutes: u64,
    #[serde(default = "default_external_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub wikipedia: WikipediaSettings,
    #[serde(default)]
    pub brave: BraveSettings,
}

/// Wikipedia (curated reference) provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WikipediaSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_wikipedia_lang")]
    pub lang: String,
    #[serde(default = "default_wikipedia_max_chars")]
    pub max_chars: usize,
}

/// Brave (general web) provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BraveSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_brave_max_results")]
    pub max_results: usize,
    #[serde(default = "default_brave_min_interval_ms")]
    pub min_interval_ms: u64,
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_summary_max_tokens() -> u32 {
    250
}

fn default_temperature() -> f32 {
    0.2
}

fn default_generation_timeout_seconds() -> u64 {
    120
}

fn default_top_k() -> usize {
    4
}

fn default_history_depth() -> usize {
    20
}

fn default_summarize_threshold() -> usize {
    10
}

fn default_cancel_grace_ms() -> u64 {
    1000
}

fn default_external_cache_ttl_minutes() -> u64 {
    15
}

fn default_external_timeout_seconds() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_wikipedia_lang() -> String {
    "en".to_string()
}

fn default_wikipedia_max_chars() -> usize {
    4000
}

fn default_brave_max_results() -> usize {
    5
}

fn default_brave_min_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            provider: ProviderType::default(),
            model: default_generation_model(),
            base_url: None,
            api_key_env: None,
            max_tokens: default_max_tokens(),
            summary_max_tokens: default_summary_max_tokens(),
            temperature: default_temperature(),
            timeout_seconds: default_generation_timeout_seconds(),
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::default(),
            top_k: default_top_k(),
        }
    }
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            history_depth: default_history_depth(),
            summarize_threshold: default_summarize_threshold(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

impl Default for ExternalSettings {
    fn default() -> Self {
        Self {
            cache_ttl_minutes: default_external_cache_ttl_minutes(),
            timeout_seconds: default_external_timeout_seconds(),
            wikipedia: WikipediaSettings::default(),
            brave: BraveSettings::default(),
        }
    }
}

impl Default for WikipediaSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            lang: default_wikipedia_lang(),
            max_chars: default_wikipedia_max_chars(),
        }
    }
}

impl Default for BraveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_results: default_brave_max_results(),
            min_interval_ms: default_brave_min_interval_ms(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn deserialize_provider<'de, D>(deserializer: D) -> Result<ProviderType, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    value.parse().map_err(serde::de::Error::custom)
}

fn serialize_provider<S>(provider: &ProviderType, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(provider.as_str())
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    ConfigDirNotFound,
}

impl Settings {
    /// Load settings from the TOML configuration file.
    ///
    /// If the config file doesn't exist, creates it with default values.
    /// The file is located at `~/.config/sage/config.toml`.
    pub fn load() -> Result<Self, SettingsError> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!("Creating default configuration at {:?}", config_path);
            Self::create_default_config(&config_path)?;
        }

        let content = fs::read_to_string(&config_path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings)
    }

    /// Serialize settings to TOML content.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the configuration file path.
    ///
    /// Uses `SAGE_CONFIG_DIR` when set, otherwise the XDG config directory.
    pub fn config_path() -> Result<PathBuf, SettingsError> {
        if let Ok(override_dir) = std::env::var("SAGE_CONFIG_DIR") {
            let dir = PathBuf::from(override_dir);
            return Ok(dir.join("config.toml"));
        }

        let config_dir = dirs::config_dir()
            .ok_or(SettingsError::ConfigDirNotFound)?
            .join("sage");

        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TOML)?;
        Ok(())
    }

    /// Save settings to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = self.to_toml()?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Env var holding the generation API key.
    pub fn generation_api_key_env(&self) -> &str {
        self.generation
            .api_key_env
            .as_deref()
            .unwrap_or("OPENAI_API_KEY")
    }
}
