pub mod cancel;
pub mod conversation;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod retrieval;
pub mod state;
pub mod web;

pub use cancel::{CancellationToken, Cancelled};
pub use conversation::{ConversationHistory, HistoryEntry};
pub use orchestrator::{QueryOrchestrator, QueryOutcome, QueryPhase, QueryRequest};
pub use providers::provider::{AnswerStream, GenerationProvider, GenerationRequest, ProviderError};
pub use retrieval::{RetrievalError, RetrievalOutcome, RetrievalStrategy, RetrievedContext};
pub use state::{AssistantContext, StateError};
pub use web::search::{ExternalHit, ExternalSearch, ExternalSearchProvider, SearchError};
