//! Secrets configuration loaded from environment variables only.
//!
//! This module handles sensitive configuration like API keys that should
//! never be stored in files. All secrets are read from environment variables.

use std::env;

/// Secrets loaded exclusively from environment variables.
///
/// These are sensitive values that should never be written to disk
/// or committed to version control.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    /// Generation API key (env: OPENAI_API_KEY, or `generation.api_key_env`)
    pub generation_api_key: Option<String>,

    /// Brave Search API key (env: BRAVE_API_KEY)
    pub brave_api_key: Option<String>,
}

/// Errors that can occur when loading secrets
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("Missing required secret: {0}")]
    MissingSecret(String),
}

impl Secrets {
    /// Load secrets from environment variables.
    ///
    /// `api_key_env` names the variable holding the generation key. A `.env`
    /// file is loaded first if present (development convenience).
    pub fn from_env(api_key_env: &str) -> Self {
        let _ = dotenvy::dotenv();

        Self::from_env_inner(api_key_env)
    }

    /// Internal method to load from environment without loading .env
    pub(crate) fn from_env_inner(api_key_env: &str) -> Self {
        Self {
            generation_api_key: resolve(api_key_env),
            brave_api_key: resolve("BRAVE_API_KEY"),
        }
    }

    /// Generation API key, or `MissingSecret` naming the variable to set.
    pub fn require_generation_key(&self, api_key_env: &str) -> Result<&str, SecretsError> {
        self.generation_api_key
            .as_deref()
            .ok_or_else(|| SecretsError::MissingSecret(api_key_env.to_string()))
    }
}

/// Read a non-empty environment variable.
pub fn resolve(env_name: &str) -> Option<String> {
    env::var(env_name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
