//! Per-conversation question/answer history.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::providers::GenerationProvider;

/// One completed turn. A digest produced by summarization is stored as a
/// turn whose answer is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub question: String,
    pub answer: String,
}

impl HistoryEntry {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }

    pub fn digest(summary: impl Into<String>) -> Self {
        Self::new(summary, "")
    }
}

/// Bounded history with summarization once it grows past a threshold.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
    depth: usize,
    summarize_threshold: usize,
    /// Bumped by every change to `entries`.
    revision: u64,
}

impl ConversationHistory {
    pub fn new(depth: usize, summarize_threshold: usize) -> Self {
        Self {
            entries: Vec::new(),
            depth: depth.max(1),
            summarize_threshold,
            revision: 0,
        }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Append a finished turn, dropping the oldest turns beyond the depth.
    pub fn commit(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.entries.push(HistoryEntry::new(question, answer));
        if self.entries.len() > self.depth {
            let excess = self.entries.len() - self.depth;
            self.entries.drain(..excess);
        }
        self.revision += 1;
    }

    pub fn needs_summary(&self) -> bool {
        self.summarize_threshold > 0 && self.entries.len() >= self.summarize_threshold
    }

    /// Replace the whole history with a single digest turn.
    pub fn replace_with_digest(&mut self, digest: impl Into<String>) {
        self.entries = vec![HistoryEntry::digest(digest)];
        self.revision += 1;
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.revision += 1;
    }

    /// Collapse the history through `provider` when it has reached the
    /// threshold. Failures leave the history as it was. Returns whether a
    /// digest replaced the history.
    pub async fn summarize_if_needed(&mut self, provider: &dyn GenerationProvider) -> bool {
        if !self.needs_summary() {
            return false;
        }

        match provider.summarize(&self.entries).await {
            Ok(digest) if !digest.trim().is_empty() => {
                info!(
                    turns = self.entries.len(),
                    digest_chars = digest.chars().count(),
                    "conversation summarized"
                );
                self.replace_with_digest(digest.trim());
                true
            }
            Ok(_) => {
                warn!("summarizer returned an empty digest; keeping full history");
                false
            }
            Err(err) => {
                warn!(error = %err, "history summarization failed; keeping full history");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_trims_oldest_first() {
        let mut history = ConversationHistory::new(3, 10);
        for i in 0..5 {
            history.commit(format!("q{i}"), format!("a{i}"));
        }
        let questions: Vec<_> = history.entries().iter().map(|e| e.question.as_str()).collect();
        assert_eq!(questions, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn needs_summary_at_threshold() {
        let mut history = ConversationHistory::new(20, 2);
        history.commit("q0", "a0");
        assert!(!history.needs_summary());
        history.commit("q1", "a1");
        assert!(history.needs_summary());
    }

    #[test]
    fn threshold_above_depth_never_triggers() {
        let mut history = ConversationHistory::new(3, 5);
        for i in 0..10 {
            history.commit(format!("q{i}"), "a");
        }
        assert_eq!(history.len(), 3);
        assert!(!history.needs_summary());
    }

    #[test]
    fn digest_replaces_everything() {
        let mut history = ConversationHistory::new(5, 2);
        history.commit("q0", "a0");
        history.commit("q1", "a1");
        history.replace_with_digest("talked about q0 and q1");
        assert_eq!(history.entries(), &[HistoryEntry::digest("talked about q0 and q1")]);
        history.reset();
        assert!(history.is_empty());
    }

    #[test]
    fn every_change_bumps_revision() {
        let mut history = ConversationHistory::new(5, 2);
        let start = history.revision();
        history.commit("q0", "a0");
        assert_eq!(history.revision(), start + 1);
        history.replace_with_digest("digest");
        assert_eq!(history.revision(), start + 2);
        history.reset();
        assert_eq!(history.revision(), start + 3);

        let snapshot = history.clone();
        history.commit("q1", "a1");
        assert_ne!(snapshot.revision(), history.revision());
    }
}
