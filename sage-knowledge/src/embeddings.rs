use std::sync::Arc;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use sage_core::EmbeddingProviderType;

use crate::KnowledgeSettings;
use crate::errors::{KnowledgeError, KnowledgeResult};

const DEFAULT_HASHING_DIM: usize = 384;

/// Turns text into dense vectors.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// Embed every input, returning one vector per input in order.
    async fn embed_batch(&self, inputs: &[String]) -> KnowledgeResult<Vec<Vec<f32>>>;
}

/// Build the embedder selected by `[knowledge].embedding_provider`.
pub fn build_embedder(settings: &KnowledgeSettings) -> Arc<dyn Embedder> {
    match settings.embedding_provider {
        EmbeddingProviderType::Ollama => Arc::new(EmbeddingClient::new(settings)),
        EmbeddingProviderType::Hashing => Arc::new(HashingEmbedder::new(
            settings.embedding_dim.unwrap_or(DEFAULT_HASHING_DIM),
        )),
    }
}

/// Ollama `/api/embed` client.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(settings: &KnowledgeSettings) -> Self {
        Self {
            base_url: settings.embedding_url.trim_end_matches('/').to_string(),
            model: settings.embedding_model.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl Embedder for EmbeddingClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed_batch(&self, inputs: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.base_url);
        let body = EmbedRequest {
            model: self.model.clone(),
            input: inputs.to_vec(),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(KnowledgeError::Embedding(format!(
                "embedding request failed: {status} {text}"
            )));
        }

        let payload: EmbedResponse = response.json().await?;

        let embeddings = if let Some(embeddings) = payload.embeddings {
            embeddings
        } else if let Some(embedding) = payload.embedding {
            vec![embedding]
        } else {
            return Err(KnowledgeError::Embedding(
                "embedding response missing vectors".to_string(),
            ));
        };

        if embeddings.len() != inputs.len() {
            return Err(KnowledgeError::Embedding(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedResponse {
    embeddings: Option<Vec<Vec<f32>>>,
    embedding: Option<Vec<f32>>,
}

/// Offline bag-of-words embedder using signed feature hashing.
///
/// Deterministic across runs and platforms, so persisted vectors stay
/// comparable with fresh query vectors.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dim as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait::async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed_batch(&self, inputs: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|input| self.embed_one(input)).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let inputs = vec!["Paris is the capital of France.".to_string()];
        let first = embedder.embed_batch(&inputs).await.unwrap();
        let second = embedder.embed_batch(&inputs).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].len(), 64);
        let norm: f32 = first[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashing_embedder_ignores_case_and_punctuation() {
        let embedder = HashingEmbedder::new(32);
        assert_eq!(embedder.embed_one("Capital, France!"), embedder.embed_one("capital france"));
    }

    #[test]
    fn blank_text_embeds_to_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        assert!(embedder.embed_one("  ...  ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn build_embedder_follows_settings() {
        let settings = KnowledgeSettings {
            embedding_provider: EmbeddingProviderType::Hashing,
            ..Default::default()
        };
        assert_eq!(build_embedder(&settings).name(), "hashing");
        assert_eq!(build_embedder(&KnowledgeSettings::default()).name(), "ollama");
    }
}
