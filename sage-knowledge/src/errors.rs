#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("missing data directory")]
    MissingDataDir,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("document produced no indexable content")]
    EmptyContent,
    #[error("unknown source: {0}")]
    NotFound(String),
    #[error("document too large: {actual} characters exceeds limit of {limit}")]
    SizeLimitExceeded { limit: usize, actual: usize },
    #[error("corrupt index state: {0}")]
    CorruptState(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimMismatch { expected: usize, actual: usize },
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("vector backend error: {0}")]
    Backend(String),
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;
