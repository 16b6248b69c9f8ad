//! Prompt construction shared by all generation providers.

use crate::conversation::HistoryEntry;
use crate::providers::GenerationRequest;

pub const ANSWER_SYSTEM_PROMPT: &str = "You are a precise, polite assistant. Answer the user's \
question using only the information in the CONTEXT. If the CONTEXT does not contain the answer, \
say that the provided materials do not answer the question. Be concise.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "Summarize the dialogue below briefly but informatively, \
keeping its key topics.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptRole::System => "system",
            PromptRole::User => "user",
            PromptRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// System prompt, prior turns, then the context-bearing question.
pub fn answer_messages(request: &GenerationRequest) -> Vec<PromptMessage> {
    let mut messages = vec![PromptMessage::new(PromptRole::System, ANSWER_SYSTEM_PROMPT)];
    push_history(&mut messages, &request.history);
    messages.push(PromptMessage::new(
        PromptRole::User,
        format!(
            "CONTEXT:\n{}\n\nQUESTION: {}",
            request.context, request.question
        ),
    ));
    messages
}

pub fn summary_messages(history: &[HistoryEntry]) -> Vec<PromptMessage> {
    let mut messages = vec![PromptMessage::new(PromptRole::System, SUMMARY_SYSTEM_PROMPT)];
    push_history(&mut messages, history);
    messages
}

/// Digest turns have no answer, so only their question is replayed.
fn push_history(messages: &mut Vec<PromptMessage>, history: &[HistoryEntry]) {
    for entry in history {
        messages.push(PromptMessage::new(PromptRole::User, entry.question.clone()));
        if !entry.answer.is_empty() {
            messages.push(PromptMessage::new(
                PromptRole::Assistant,
                entry.answer.clone(),
            ));
        }
    }
}

/// Plain-text transcript for debug logs.
pub fn render_transcript(messages: &[PromptMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("[{}] {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
