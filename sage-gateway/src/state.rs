//! Shared assistant dependencies, built once from configuration.

use std::sync::Arc;

use sage_core::Config;
use sage_knowledge::{KnowledgeError, KnowledgeIndex};
use tracing::info;

use crate::orchestrator::QueryOrchestrator;
use crate::providers::{GenerationProvider, ProviderError, build_provider};
use crate::retrieval::RetrievalStrategy;
use crate::web::search::{ExternalSearch, SearchError};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("knowledge index: {0}")]
    Knowledge(#[from] KnowledgeError),
    #[error("generation provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("external search: {0}")]
    Search(#[from] SearchError),
}

/// Explicit dependency object handed to front-ends.
pub struct AssistantContext {
    pub config: Config,
    pub index: Arc<KnowledgeIndex>,
    pub orchestrator: Arc<QueryOrchestrator>,
}

impl AssistantContext {
    /// Open the knowledge index and build every provider `config` selects.
    pub async fn from_config(config: Config) -> Result<Self, StateError> {
        let index = Arc::new(KnowledgeIndex::open(config.knowledge_settings()).await?);
        let external = Arc::new(ExternalSearch::from_settings(
            &config.settings.external,
            config.brave_api_key(),
        )?);
        let generator = build_provider(
            &config.settings.generation,
            config.generation_api_key().map(str::to_string),
        )?;
        info!(
            provider = generator.name(),
            model = generator.model(),
            mode = %config.settings.retrieval.mode,
            "assistant ready"
        );
        Ok(Self::from_parts(config, index, external, generator))
    }

    /// Assemble from already-built collaborators.
    pub fn from_parts(
        config: Config,
        index: Arc<KnowledgeIndex>,
        external: Arc<ExternalSearch>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Self {
        let retrieval = Arc::new(RetrievalStrategy::new(
            Arc::clone(&index),
            external,
            config.settings.retrieval.top_k,
        ));
        let orchestrator = Arc::new(QueryOrchestrator::new(
            retrieval,
            generator,
            &config.settings.conversation,
        ));
        Self {
            config,
            index,
            orchestrator,
        }
    }
}
