//! Knowledge index configuration types.
//!
//! These types define the resolved (non-optional) settings used by
//! `sage-knowledge`. They are created from the user-facing
//! `KnowledgeSection` TOML struct via `From`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::settings::KnowledgeSection;
use crate::types::EmbeddingProviderType;

/// Resolved knowledge index settings (all values filled with defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSettings {
    #[serde(default)]
    pub embedding_provider: EmbeddingProviderType,
    #[serde(default = "default_embedding_url")]
    pub embedding_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub embedding_dim: Option<usize>,
    #[serde(default = "default_embedding_batch")]
    pub embedding_batch: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Documents longer than this are refused by `ensure_within_limit`.
    #[serde(default)]
    pub max_document_chars: Option<usize>,
    /// Directory holding `index.json` and `source_map.json`.
    /// When unset, resolves to `<data root>/knowledge`.
    #[serde(default)]
    pub index_dir_override: Option<PathBuf>,
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            embedding_provider: EmbeddingProviderType::default(),
            embedding_url: default_embedding_url(),
            embedding_model: default_embedding_model(),
            embedding_dim: None,
            embedding_batch: default_embedding_batch(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_document_chars: None,
            index_dir_override: None,
        }
    }
}

fn default_embedding_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_batch() -> usize {
    32
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

impl From<&KnowledgeSection> for KnowledgeSettings {
    fn from(value: &KnowledgeSection) -> Self {
        let mut settings = KnowledgeSettings::default();
        if let Some(provider) = value.embedding_provider {
            settings.embedding_provider = provider;
        }
        if let Some(url) = &value.embedding_url {
            settings.embedding_url = url.clone();
        }
        if let Some(model) = &value.embedding_model {
            settings.embedding_model = model.clone();
        }
        if let Some(dim) = value.embedding_dim {
            settings.embedding_dim = Some(dim);
        }
        if let Some(batch) = value.embedding_batch {
            settings.embedding_batch = batch.max(1);
        }
        if let Some(size) = value.chunk_size {
            settings.chunk_size = size.max(1);
        }
        if let Some(overlap) = value.chunk_overlap {
            settings.chunk_overlap = overlap;
        }
        if let Some(max) = value.max_document_chars {
            settings.max_document_chars = Some(max);
        }
        if let Some(path) = &value.index_dir_override {
            settings.index_dir_override = Some(PathBuf::from(path));
        }
        settings
    }
}
