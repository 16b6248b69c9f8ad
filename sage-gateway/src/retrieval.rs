//! Context retrieval with strict precedence: the knowledge index first, then
//! external providers in priority order. Sources are never blended.

use std::sync::Arc;

use sage_core::RetrievalMode;
use sage_knowledge::{ChunkHit, KnowledgeIndex};
use tracing::{info, warn};

use crate::web::search::ExternalSearch;

/// Context handed to the generator together with its attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedContext {
    pub text: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalOutcome {
    Context(RetrievedContext),
    /// Nothing usable was found; the caller should not generate.
    NoContext,
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("all external providers failed: {}", .failures.join("; "))]
    ExternalUnavailable { failures: Vec<String> },
}

pub struct RetrievalStrategy {
    index: Arc<KnowledgeIndex>,
    external: Arc<ExternalSearch>,
    top_k: usize,
}

impl RetrievalStrategy {
    pub fn new(index: Arc<KnowledgeIndex>, external: Arc<ExternalSearch>, top_k: usize) -> Self {
        Self {
            index,
            external,
            top_k: top_k.max(1),
        }
    }

    pub fn index(&self) -> &Arc<KnowledgeIndex> {
        &self.index
    }

    pub async fn retrieve(
        &self,
        query: &str,
        mode: RetrievalMode,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        if mode.uses_knowledge_index() {
            let hits = self.index.search(query, self.top_k).await;
            if !hits.is_empty() {
                info!(hits = hits.len(), %mode, "answering from knowledge index");
                return Ok(RetrievalOutcome::Context(knowledge_context(&hits)));
            }
        }

        if mode.uses_external_search() {
            return self.retrieve_external(query).await;
        }

        info!(%mode, "no context found");
        Ok(RetrievalOutcome::NoContext)
    }

    async fn retrieve_external(&self, query: &str) -> Result<RetrievalOutcome, RetrievalError> {
        let mut failures = Vec::new();
        let mut consulted = 0usize;

        for provider in self.external.providers() {
            consulted += 1;
            match self.external.search_with(provider.as_ref(), query).await {
                Ok(Some(hit)) if hit.is_usable() => {
                    info!(provider = provider.label(), "answering from external search");
                    return Ok(RetrievalOutcome::Context(RetrievedContext {
                        text: hit.text,
                        sources: vec![hit.label],
                    }));
                }
                Ok(_) => info!(provider = provider.label(), "external provider found nothing"),
                Err(err) => {
                    warn!(provider = provider.label(), error = %err, "external provider failed");
                    failures.push(format!("{}: {}", provider.label(), err));
                }
            }
        }

        if consulted > 0 && failures.len() == consulted {
            return Err(RetrievalError::ExternalUnavailable { failures });
        }

        info!("no context found");
        Ok(RetrievalOutcome::NoContext)
    }
}

/// Chunk texts separated by blank lines, labels deduplicated in first-seen order.
fn knowledge_context(hits: &[ChunkHit]) -> RetrievedContext {
    let text = hits
        .iter()
        .map(|hit| hit.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut sources: Vec<String> = Vec::new();
    for hit in hits {
        if !sources.contains(&hit.source_label) {
            sources.push(hit.source_label.clone());
        }
    }

    RetrievedContext { text, sources }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn hit(label: &str, text: &str) -> ChunkHit {
        ChunkHit {
            chunk_id: format!("{label}-{text}"),
            source_id: label.to_string(),
            source_label: label.to_string(),
            text: text.to_string(),
            score: 0.5,
            indexed_at: Utc::now(),
        }
    }

    #[test]
    fn knowledge_context_dedups_labels_in_order() {
        let context = knowledge_context(&[
            hit("b.txt", "first"),
            hit("a.txt", "second"),
            hit("b.txt", "third"),
        ]);
        assert_eq!(context.text, "first\n\nsecond\n\nthird");
        assert_eq!(context.sources, vec!["b.txt", "a.txt"]);
    }
}
