//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tempfile::TempDir;

use sage_core::{ConversationSettings, EmbeddingProviderType, KnowledgeSettings, RetrievalMode};
use sage_gateway::{
    AnswerStream, CancellationToken, ExternalHit, ExternalSearch, ExternalSearchProvider,
    GenerationProvider, GenerationRequest, HistoryEntry, ProviderError, QueryOrchestrator,
    QueryPhase, QueryRequest, RetrievalStrategy, SearchError,
};
use sage_knowledge::KnowledgeIndex;

/// What the scripted generator does for one answer.
#[derive(Debug, Clone)]
pub enum Script {
    Answer(&'static str),
    /// Yields a partial answer, then never finishes.
    Stall,
    /// Sleeps inside `stream_answer` without looking at the token.
    Hang(Duration),
    Fail,
    Panic,
}

/// Generation fake that follows a queue of scripts and records its inputs.
pub struct ScriptedGenerator {
    scripts: Mutex<VecDeque<Script>>,
    summary: Mutex<Result<String, String>>,
    summary_delay: Mutex<Duration>,
    pub requests: Mutex<Vec<GenerationRequest>>,
    pub summarize_calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            summary: Mutex::new(Ok("digest of earlier turns".to_string())),
            summary_delay: Mutex::new(Duration::ZERO),
            requests: Mutex::new(Vec::new()),
            summarize_calls: AtomicUsize::new(0),
        })
    }

    pub fn failing_summaries(self: Arc<Self>) -> Arc<Self> {
        *self.summary.lock().unwrap() = Err("summarizer offline".to_string());
        self
    }

    /// Every summary takes `delay` to come back.
    pub fn slow_summaries(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.summary_delay.lock().unwrap() = delay;
        self
    }

    pub fn summarize_calls(&self) -> usize {
        self.summarize_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn generation_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl GenerationProvider for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn stream_answer(
        &self,
        request: &GenerationRequest,
        _cancel: &CancellationToken,
    ) -> Result<AnswerStream, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Answer("scripted answer"));

        match script {
            Script::Answer(text) => {
                let words: Vec<Result<String, ProviderError>> = text
                    .split_inclusive(' ')
                    .map(|word| Ok(word.to_string()))
                    .collect();
                Ok(futures::stream::iter(words).boxed())
            }
            Script::Stall => Ok(futures::stream::iter(vec![Ok("partial ".to_string())])
                .chain(futures::stream::pending())
                .boxed()),
            Script::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Ok(futures::stream::iter(vec![Ok("late answer".to_string())]).boxed())
            }
            Script::Fail => Err(ProviderError::ApiError {
                message: "503 - overloaded".to_string(),
            }),
            Script::Panic => panic!("scripted generator panic"),
        }
    }

    async fn summarize(&self, _history: &[HistoryEntry]) -> Result<String, ProviderError> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.summary_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.summary
            .lock()
            .unwrap()
            .clone()
            .map_err(|message| ProviderError::ApiError { message })
    }
}

/// External provider fake with a fixed reply.
pub struct FakeExternal {
    label: &'static str,
    reply: Result<Option<&'static str>, &'static str>,
    pub calls: AtomicUsize,
}

impl FakeExternal {
    pub fn answering(label: &'static str, text: &'static str) -> Arc<Self> {
        Self::with_reply(label, Ok(Some(text)))
    }

    pub fn empty(label: &'static str) -> Arc<Self> {
        Self::with_reply(label, Ok(None))
    }

    pub fn failing(label: &'static str) -> Arc<Self> {
        Self::with_reply(label, Err("connection refused"))
    }

    fn with_reply(label: &'static str, reply: Result<Option<&'static str>, &'static str>) -> Arc<Self> {
        Arc::new(Self {
            label,
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ExternalSearchProvider for FakeExternal {
    fn label(&self) -> &str {
        self.label
    }

    async fn search(&self, _query: &str) -> Result<Option<ExternalHit>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reply {
            Ok(Some(text)) => Ok(Some(ExternalHit::new(self.label, text))),
            Ok(None) => Ok(None),
            Err(message) => Err(SearchError::RequestFailed(message.to_string())),
        }
    }
}

pub fn external(providers: Vec<Arc<FakeExternal>>) -> Arc<ExternalSearch> {
    let providers = providers
        .into_iter()
        .map(|p| p as Arc<dyn ExternalSearchProvider>)
        .collect();
    Arc::new(ExternalSearch::new(providers, Duration::from_secs(60)))
}

pub async fn open_index(dir: &TempDir) -> Arc<KnowledgeIndex> {
    let settings = KnowledgeSettings {
        embedding_provider: EmbeddingProviderType::Hashing,
        embedding_dim: Some(128),
        chunk_size: 300,
        chunk_overlap: 50,
        index_dir_override: Some(dir.path().join("knowledge")),
        ..Default::default()
    };
    Arc::new(KnowledgeIndex::open(settings).await.expect("open index"))
}

pub fn conversation_settings(
    history_depth: usize,
    summarize_threshold: usize,
    cancel_grace_ms: u64,
) -> ConversationSettings {
    ConversationSettings {
        history_depth,
        summarize_threshold,
        cancel_grace_ms,
    }
}

pub fn orchestrator(
    index: Arc<KnowledgeIndex>,
    external: Arc<ExternalSearch>,
    generator: Arc<ScriptedGenerator>,
    settings: ConversationSettings,
) -> Arc<QueryOrchestrator> {
    let retrieval = Arc::new(RetrievalStrategy::new(index, external, 3));
    Arc::new(QueryOrchestrator::new(retrieval, generator, &settings))
}

pub fn kb_question(conversation_id: &str, question: &str) -> QueryRequest {
    QueryRequest::new(conversation_id, question, RetrievalMode::KbOnly)
}

pub async fn wait_for_phase(orchestrator: &QueryOrchestrator, conversation_id: &str, phase: QueryPhase) {
    for _ in 0..400 {
        if orchestrator.phase(conversation_id).await == phase {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("conversation {conversation_id} never reached {phase}");
}

/// Wait until the generator has been asked for `calls` answers.
pub async fn wait_for_generation_calls(generator: &ScriptedGenerator, calls: usize) {
    for _ in 0..400 {
        if generator.generation_calls() >= calls {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("generator never reached {calls} calls");
}

/// Wait until the generator has been asked for `calls` summaries.
pub async fn wait_for_summarize_calls(generator: &ScriptedGenerator, calls: usize) {
    for _ in 0..400 {
        if generator.summarize_calls() >= calls {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("generator never reached {calls} summaries");
}
