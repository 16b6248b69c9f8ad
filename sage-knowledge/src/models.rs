use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chunk returned by `KnowledgeIndex::search`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub source_id: String,
    pub source_label: String,
    pub text: String,
    /// Cosine similarity to the query.
    pub score: f32,
    pub indexed_at: DateTime<Utc>,
}

/// One indexed source document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceSummary {
    pub source_id: String,
    pub label: String,
    pub chunk_count: usize,
    pub indexed_at: DateTime<Utc>,
}

/// Chunk metadata kept beside the vector backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMeta {
    pub source_id: String,
    pub source_label: String,
    pub ordinal: usize,
    pub text: String,
    pub indexed_at: DateTime<Utc>,
}
