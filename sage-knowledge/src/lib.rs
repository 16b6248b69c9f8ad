//! Knowledge index for sage: chunking, embedding and similarity search over
//! private documents, persisted as JSON.

pub mod backend;
pub mod chunker;
pub mod embeddings;
pub mod errors;
pub mod index;
pub mod models;
pub mod paths;
pub mod storage;

pub use backend::{FlatIndex, VectorBackend};
pub use chunker::TextChunker;
pub use embeddings::{Embedder, EmbeddingClient, HashingEmbedder, build_embedder};
pub use errors::{KnowledgeError, KnowledgeResult};
pub use index::KnowledgeIndex;
pub use models::{ChunkHit, SourceSummary};
pub use sage_core::config::KnowledgeSettings;
