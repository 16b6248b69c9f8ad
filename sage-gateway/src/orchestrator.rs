//! Per-conversation query execution.
//!
//! Every question runs in its own task. Within one conversation tasks are
//! single-flight: a new question cancels the one in flight, waits up to the
//! configured grace period for it to stop, then proceeds regardless. Only the
//! conversation's current task may write to its history.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sage_core::{ConversationSettings, RetrievalMode};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::conversation::{ConversationHistory, HistoryEntry};
use crate::providers::{GenerationProvider, GenerationRequest, ProviderError};
use crate::retrieval::{RetrievalOutcome, RetrievalStrategy};

/// One question asked within a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub conversation_id: String,
    pub question: String,
    #[serde(default)]
    pub mode: RetrievalMode,
}

impl QueryRequest {
    pub fn new(
        conversation_id: impl Into<String>,
        question: impl Into<String>,
        mode: RetrievalMode,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            question: question.into(),
            mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Generated answer and the labels of the sources it was grounded on.
    Answered { answer: String, sources: Vec<String> },
    /// Retrieval found nothing; no answer was generated.
    NoContext,
    Cancelled,
    Failed { cause: String },
}

impl QueryOutcome {
    /// The terminal phase this outcome corresponds to.
    pub fn terminal_phase(&self) -> QueryPhase {
        match self {
            QueryOutcome::Answered { .. } | QueryOutcome::NoContext => QueryPhase::Done,
            QueryOutcome::Cancelled => QueryPhase::Cancelled,
            QueryOutcome::Failed { .. } => QueryPhase::Error,
        }
    }

    fn cancelled(conversation_id: &str, task_id: u64, at: &'static str) -> Self {
        info!(conversation_id, task_id, at, "query cancelled");
        QueryOutcome::Cancelled
    }

    fn failed(conversation_id: &str, task_id: u64, cause: String) -> Self {
        warn!(conversation_id, task_id, cause = %cause, "query failed");
        QueryOutcome::Failed { cause }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPhase {
    #[default]
    Idle,
    Retrieving,
    Generating,
    Done,
    Cancelled,
    Error,
}

impl QueryPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryPhase::Idle => "idle",
            QueryPhase::Retrieving => "retrieving",
            QueryPhase::Generating => "generating",
            QueryPhase::Done => "done",
            QueryPhase::Cancelled => "cancelled",
            QueryPhase::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryPhase::Done | QueryPhase::Cancelled | QueryPhase::Error
        )
    }
}

impl std::fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ActiveTask {
    id: u64,
    cancel: CancellationToken,
    finished: watch::Receiver<bool>,
}

struct ConversationState {
    history: ConversationHistory,
    phase: QueryPhase,
    active: Option<ActiveTask>,
}

type Conversation = Arc<Mutex<ConversationState>>;

pub struct QueryOrchestrator {
    retrieval: Arc<RetrievalStrategy>,
    generator: Arc<dyn GenerationProvider>,
    history_depth: usize,
    summarize_threshold: usize,
    cancel_grace: Duration,
    conversations: Mutex<HashMap<String, Conversation>>,
    next_task_id: AtomicU64,
}

impl QueryOrchestrator {
    pub fn new(
        retrieval: Arc<RetrievalStrategy>,
        generator: Arc<dyn GenerationProvider>,
        settings: &ConversationSettings,
    ) -> Self {
        Self {
            retrieval,
            generator,
            history_depth: settings.history_depth,
            summarize_threshold: settings.summarize_threshold,
            cancel_grace: Duration::from_millis(settings.cancel_grace_ms),
            conversations: Mutex::new(HashMap::new()),
            next_task_id: AtomicU64::new(1),
        }
    }

    pub fn generator(&self) -> &Arc<dyn GenerationProvider> {
        &self.generator
    }

    /// Answer one question. Never fails: errors, panics and cancellation
    /// all come back as a [`QueryOutcome`].
    pub async fn ask(&self, request: QueryRequest) -> QueryOutcome {
        self.ask_with_token(request, CancellationToken::new()).await
    }

    /// Like [`ask`](Self::ask), cancelling the query once `deadline` elapses.
    pub async fn ask_with_timeout(&self, request: QueryRequest, deadline: Duration) -> QueryOutcome {
        let cancel = CancellationToken::new();
        let timer = {
            let cancel = cancel.clone();
            let conversation_id = request.conversation_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                info!(conversation_id = %conversation_id, ?deadline, "query deadline elapsed");
                cancel.cancel();
            })
        };

        let outcome = self.ask_with_token(request, cancel).await;
        timer.abort();
        outcome
    }

    async fn ask_with_token(&self, request: QueryRequest, cancel: CancellationToken) -> QueryOutcome {
        let conversation = self.conversation(&request.conversation_id).await;
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (finished_tx, finished_rx) = watch::channel(false);

        let previous = {
            let mut state = conversation.lock().await;
            state.active.replace(ActiveTask {
                id: task_id,
                cancel: cancel.clone(),
                finished: finished_rx,
            })
        };

        if let Some(previous) = previous {
            self.supersede(&request.conversation_id, previous).await;
            let mut state = conversation.lock().await;
            if state.active.as_ref().is_some_and(|active| active.id == task_id) {
                state.phase = QueryPhase::Idle;
            }
        }

        debug!(
            conversation_id = %request.conversation_id,
            task_id,
            mode = %request.mode,
            "query started"
        );

        let job = QueryJob {
            task_id,
            conversation: Arc::clone(&conversation),
            retrieval: Arc::clone(&self.retrieval),
            generator: Arc::clone(&self.generator),
            cancel,
            request,
        };
        let conversation_id = job.request.conversation_id.clone();

        let supervisor = tokio::spawn(async move {
            let worker = tokio::spawn(job.run());
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => {
                    error!(conversation_id = %conversation_id, task_id, "query task panicked");
                    QueryOutcome::Failed {
                        cause: "internal error: query task panicked".to_string(),
                    }
                }
                Err(err) => QueryOutcome::failed(
                    &conversation_id,
                    task_id,
                    format!("query task aborted: {err}"),
                ),
            };

            let mut state = conversation.lock().await;
            if state.active.as_ref().is_some_and(|active| active.id == task_id) {
                debug!(
                    conversation_id = %conversation_id,
                    task_id,
                    phase = %outcome.terminal_phase(),
                    "query finished"
                );
                state.active = None;
                state.phase = QueryPhase::Idle;
            }
            drop(state);
            let _ = finished_tx.send(true);
            outcome
        });

        match supervisor.await {
            Ok(outcome) => outcome,
            Err(err) => QueryOutcome::Failed {
                cause: format!("internal error: {err}"),
            },
        }
    }

    /// Cancel the previous task and give it `cancel_grace` to wind down.
    async fn supersede(&self, conversation_id: &str, previous: ActiveTask) {
        info!(conversation_id, task_id = previous.id, "superseding in-flight query");
        previous.cancel.cancel();

        let mut finished = previous.finished;
        let stopped = tokio::time::timeout(self.cancel_grace, finished.wait_for(|done| *done))
            .await
            .is_ok();
        if stopped {
            debug!(conversation_id, task_id = previous.id, "superseded query stopped");
        } else {
            warn!(
                conversation_id,
                task_id = previous.id,
                grace_ms = self.cancel_grace.as_millis() as u64,
                "superseded query ignored cancellation; detaching it"
            );
        }
    }

    /// Cancel the in-flight query of a conversation. Returns whether one
    /// was running.
    pub async fn cancel(&self, conversation_id: &str) -> bool {
        let Some(conversation) = self.existing(conversation_id).await else {
            return false;
        };
        let state = conversation.lock().await;
        match &state.active {
            Some(active) => {
                info!(conversation_id, task_id = active.id, "cancellation requested");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel queries by conversation id as requests arrive on `requests`.
    /// The listener stops when every sender is dropped.
    pub fn spawn_cancel_listener(
        self: &Arc<Self>,
        mut requests: mpsc::Receiver<String>,
    ) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(conversation_id) = requests.recv().await {
                if !orchestrator.cancel(&conversation_id).await {
                    debug!(conversation_id = %conversation_id, "nothing to cancel");
                }
            }
            debug!("cancel listener stopped");
        })
    }

    /// Forget a conversation's history and cancel its in-flight query. The
    /// conversation is dropped from the table once no task refers to it.
    pub async fn reset(&self, conversation_id: &str) {
        let mut conversations = self.conversations.lock().await;
        let Some(conversation) = conversations.get(conversation_id).cloned() else {
            return;
        };
        {
            let mut state = conversation.lock().await;
            if let Some(active) = &state.active {
                active.cancel.cancel();
            }
            state.history.reset();
        }
        // The table and `conversation` are the only holders when idle.
        if Arc::strong_count(&conversation) == 2 {
            conversations.remove(conversation_id);
        }
        info!(conversation_id, "conversation reset");
    }

    /// Number of conversations currently tracked.
    pub async fn conversation_count(&self) -> usize {
        self.conversations.lock().await.len()
    }

    pub async fn history(&self, conversation_id: &str) -> Vec<HistoryEntry> {
        match self.existing(conversation_id).await {
            Some(conversation) => conversation.lock().await.history.entries().to_vec(),
            None => Vec::new(),
        }
    }

    pub async fn phase(&self, conversation_id: &str) -> QueryPhase {
        match self.existing(conversation_id).await {
            Some(conversation) => conversation.lock().await.phase,
            None => QueryPhase::Idle,
        }
    }

    async fn existing(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations.lock().await.get(conversation_id).cloned()
    }

    async fn conversation(&self, conversation_id: &str) -> Conversation {
        let mut conversations = self.conversations.lock().await;
        Arc::clone(
            conversations
                .entry(conversation_id.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(ConversationState {
                        history: ConversationHistory::new(
                            self.history_depth,
                            self.summarize_threshold,
                        ),
                        phase: QueryPhase::Idle,
                        active: None,
                    }))
                }),
        )
    }
}

/// Everything one spawned query needs.
struct QueryJob {
    task_id: u64,
    conversation: Conversation,
    retrieval: Arc<RetrievalStrategy>,
    generator: Arc<dyn GenerationProvider>,
    cancel: CancellationToken,
    request: QueryRequest,
}

impl QueryJob {
    fn is_current(&self, state: &ConversationState) -> bool {
        state
            .active
            .as_ref()
            .is_some_and(|active| active.id == self.task_id)
    }

    async fn enter(&self, phase: QueryPhase) {
        let mut state = self.conversation.lock().await;
        if self.is_current(&state) {
            debug!(
                conversation_id = %self.request.conversation_id,
                task_id = self.task_id,
                from = %state.phase,
                to = %phase,
                "query phase"
            );
            state.phase = phase;
        }
    }

    async fn run(self) -> QueryOutcome {
        let conversation_id = self.request.conversation_id.as_str();
        let task_id = self.task_id;

        if self.cancel.is_cancelled() {
            return QueryOutcome::cancelled(conversation_id, task_id, "before summarization");
        }

        // Summarize a snapshot so the lock is not held across the provider call.
        let mut history = self.conversation.lock().await.history.clone();
        let summarized_revision = history.revision();
        if history.needs_summary() && history.summarize_if_needed(self.generator.as_ref()).await {
            let mut state = self.conversation.lock().await;
            let unchanged = state.history.revision() == summarized_revision;
            if !self.cancel.is_cancelled() && self.is_current(&state) && unchanged {
                state.history = history.clone();
            } else {
                debug!(
                    conversation_id,
                    task_id, "history changed during summarization; digest dropped"
                );
                history = state.history.clone();
            }
        }

        if self.cancel.is_cancelled() {
            return QueryOutcome::cancelled(conversation_id, task_id, "before retrieval");
        }
        self.enter(QueryPhase::Retrieving).await;

        let context = match self
            .retrieval
            .retrieve(&self.request.question, self.request.mode)
            .await
        {
            Ok(RetrievalOutcome::Context(context)) => context,
            Ok(RetrievalOutcome::NoContext) => {
                info!(conversation_id, task_id, "no context; skipping generation");
                return QueryOutcome::NoContext;
            }
            Err(err) => {
                return QueryOutcome::failed(
                    conversation_id,
                    task_id,
                    format!("retrieval failed: {err}"),
                );
            }
        };

        if self.cancel.is_cancelled() {
            return QueryOutcome::cancelled(conversation_id, task_id, "before generation");
        }
        self.enter(QueryPhase::Generating).await;

        let generation = GenerationRequest {
            question: self.request.question.clone(),
            context: context.text,
            history: history.entries().to_vec(),
        };
        let answer = match self.generator.generate_answer(&generation, &self.cancel).await {
            Ok(answer) => answer,
            Err(ProviderError::Cancelled) => {
                return QueryOutcome::cancelled(conversation_id, task_id, "during generation");
            }
            Err(err) => {
                return QueryOutcome::failed(
                    conversation_id,
                    task_id,
                    format!("generation failed: {err}"),
                );
            }
        };

        let mut state = self.conversation.lock().await;
        if self.cancel.is_cancelled() || !self.is_current(&state) {
            return QueryOutcome::cancelled(conversation_id, task_id, "before commit");
        }
        state
            .history
            .commit(self.request.question.clone(), answer.clone());
        info!(
            conversation_id,
            task_id,
            sources = ?context.sources,
            answer_chars = answer.chars().count(),
            "query answered"
        );

        QueryOutcome::Answered {
            answer,
            sources: context.sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_phases() {
        assert_eq!(QueryOutcome::NoContext.terminal_phase(), QueryPhase::Done);
        assert_eq!(
            QueryOutcome::Cancelled.terminal_phase(),
            QueryPhase::Cancelled
        );
        assert_eq!(
            QueryOutcome::Failed {
                cause: "x".to_string()
            }
            .terminal_phase(),
            QueryPhase::Error
        );
        assert!(QueryPhase::Error.is_terminal());
        assert!(!QueryPhase::Generating.is_terminal());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = QueryOutcome::Answered {
            answer: "Paris.".to_string(),
            sources: vec!["geo.txt".to_string()],
        };
        insta::assert_snapshot!(
            serde_json::to_string(&outcome).unwrap(),
            @r#"{"status":"answered","answer":"Paris.","sources":["geo.txt"]}"#
        );
    }
}
