pub mod config;
pub mod types;

// Config re-exports
pub use config::{
    BraveSettings, Config, ConfigError, ConversationSettings, ExternalSettings,
    GenerationSettings, KnowledgeSettings, KnowledgeSection, LoggingSettings,
    RetrievalSettings, Secrets, SecretsError, Settings, SettingsError, WikipediaSettings,
    load_dotenv,
};

pub use types::{EmbeddingProviderType, ProviderType, RetrievalMode};
