//! Configuration management for sage.
//!
//! This module provides a unified configuration system that separates
//! secrets (from environment variables) from settings (from TOML files).
//!
//! # Configuration Sources
//!
//! ## Secrets (Environment Variables)
//! - `OPENAI_API_KEY` - Generation API key (or the variable named by
//!   `generation.api_key_env`)
//! - `BRAVE_API_KEY` - Brave Search API key
//!
//! ## Settings (TOML File)
//! Located at `~/.config/sage/config.toml` (or `$SAGE_CONFIG_DIR/config.toml`):
//! ```toml
//! [generation]
//! provider = "openai_compatible"
//! model = "gpt-4o-mini"
//!
//! [retrieval]
//! mode = "kb_then_external"
//!
//! [conversation]
//! history_depth = 20
//! summarize_threshold = 10
//!
//! [logging]
//! level = "info"
//! ```

pub mod knowledge;
mod secrets;
mod settings;

use crate::types::ProviderType;

pub use knowledge::KnowledgeSettings;
pub use secrets::{Secrets, SecretsError};
pub use settings::{
    BraveSettings, ConversationSettings, ExternalSettings, GenerationSettings,
    KnowledgeSection, LoggingSettings, RetrievalSettings, Settings, SettingsError,
    WikipediaSettings,
};

/// Combined configuration containing both secrets and settings.
///
/// This is the main configuration type used throughout the application.
/// It separates sensitive secrets (from env) from non-sensitive settings (from TOML).
#[derive(Debug, Clone)]
pub struct Config {
    /// Secrets loaded from environment variables
    pub secrets: Secrets,
    /// Settings loaded from TOML configuration file
    pub settings: Settings,
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Secrets error: {0}")]
    Secrets(#[from] SecretsError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Generation model is not set")]
    ModelNotSet,

    #[error("Invalid setting '{field}': {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// This loads:
    /// 1. Settings from TOML file (creating defaults if needed)
    /// 2. Secrets from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The TOML file cannot be read or parsed
    /// - The generation provider needs an API key and none is set
    /// - A numeric setting is out of range
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Settings::load()?;
        let secrets = Secrets::from_env(settings.generation_api_key_env());
        Self::from_parts(secrets, settings)
    }

    /// Validate already-loaded secrets and settings.
    pub fn from_parts(secrets: Secrets, settings: Settings) -> Result<Self, ConfigError> {
        if settings.generation.model.trim().is_empty() {
            return Err(ConfigError::ModelNotSet);
        }

        if settings.generation.provider == ProviderType::OpenAiCompatible
            && settings.generation.base_url.is_none()
        {
            secrets.require_generation_key(settings.generation_api_key_env())?;
        }

        let conversation = &settings.conversation;
        if conversation.history_depth == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "conversation.history_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        if conversation.summarize_threshold == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "conversation.summarize_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if conversation.summarize_threshold > conversation.history_depth {
            tracing::warn!(
                history_depth = conversation.history_depth,
                summarize_threshold = conversation.summarize_threshold,
                "summarize_threshold exceeds history_depth; conversations will never be summarized"
            );
        }

        if let (Some(size), Some(overlap)) = (
            settings.knowledge.chunk_size,
            settings.knowledge.chunk_overlap,
        ) && overlap >= size
        {
            return Err(ConfigError::InvalidSetting {
                field: "knowledge.chunk_overlap",
                reason: format!("overlap {} must be smaller than chunk_size {}", overlap, size),
            });
        }

        if settings.external.brave.enabled && secrets.brave_api_key.is_none() {
            tracing::warn!("Brave search enabled but BRAVE_API_KEY is not set; it will be skipped");
        }

        Ok(Self { secrets, settings })
    }

    /// Generation provider type.
    pub fn provider(&self) -> ProviderType {
        self.settings.generation.provider
    }

    /// Generation model identifier.
    pub fn model_id(&self) -> &str {
        &self.settings.generation.model
    }

    /// Get the generation API key (if configured).
    pub fn generation_api_key(&self) -> Option<&str> {
        self.secrets.generation_api_key.as_deref()
    }

    /// Get the Brave Search API key (if configured).
    pub fn brave_api_key(&self) -> Option<&str> {
        self.secrets.brave_api_key.as_deref()
    }

    /// Resolved knowledge index settings.
    pub fn knowledge_settings(&self) -> KnowledgeSettings {
        KnowledgeSettings::from(&self.settings.knowledge)
    }

    /// Brave is used only when enabled and keyed.
    pub fn brave_enabled(&self) -> bool {
        self.settings.external.brave.enabled && self.secrets.brave_api_key.is_some()
    }
}

/// Load .env file if it exists (for development convenience).
///
/// This is called automatically by `Config::load()` but is also
/// exported for use in other contexts.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}
