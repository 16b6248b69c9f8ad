use std::sync::Arc;
use std::time::Duration;

use sage_core::{GenerationSettings, ProviderType};

pub mod ollama;
pub mod openai_compatible;
pub mod provider;
pub mod stream;

pub use provider::{AnswerStream, GenerationProvider, GenerationRequest, ProviderError};

/// Build the generation backend selected by `[generation].provider`.
pub fn build_provider(
    settings: &GenerationSettings,
    api_key: Option<String>,
) -> Result<Arc<dyn GenerationProvider>, ProviderError> {
    let timeout = Duration::from_secs(settings.timeout_seconds);
    let provider: Arc<dyn GenerationProvider> = match settings.provider {
        ProviderType::OpenAiCompatible => {
            let base_url = settings
                .base_url
                .clone()
                .unwrap_or_else(|| openai_compatible::client::DEFAULT_BASE_URL.to_string());
            Arc::new(
                openai_compatible::OpenAiCompatibleClient::new(base_url, api_key, &settings.model)?
                    .with_limits(
                        settings.max_tokens,
                        settings.summary_max_tokens,
                        settings.temperature,
                    )
                    .with_timeout(timeout),
            )
        }
        ProviderType::Ollama => {
            let base_url = settings
                .base_url
                .clone()
                .unwrap_or_else(|| ollama::client::DEFAULT_BASE_URL.to_string());
            Arc::new(
                ollama::OllamaClient::new(base_url, &settings.model)?
                    .with_limits(
                        settings.max_tokens,
                        settings.summary_max_tokens,
                        settings.temperature,
                    )
                    .with_timeout(timeout),
            )
        }
    };
    Ok(provider)
}
