//! Provider trait for abstracting answer generation backends.

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::conversation::HistoryEntry;

/// Everything a provider needs to answer one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub question: String,
    pub context: String,
    pub history: Vec<HistoryEntry>,
}

/// Incremental answer text.
pub type AnswerStream = BoxStream<'static, Result<String, ProviderError>>;

/// Provider error types
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {message}")]
    ApiError { message: String },
    #[error("No content in response")]
    NoContent,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid response format: {0}")]
    InvalidFormat(String),
    #[error("Generation cancelled")]
    Cancelled,
}

/// Answer generation backend.
#[async_trait::async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Current model
    fn model(&self) -> &str;

    /// Start streaming an answer. Implementations check `cancel` before
    /// issuing the request; consumers poll it between increments.
    async fn stream_answer(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<AnswerStream, ProviderError>;

    /// Collapse a conversation into a short digest.
    async fn summarize(&self, history: &[HistoryEntry]) -> Result<String, ProviderError>;

    /// Collect a streamed answer. Waiting for each increment races the token,
    /// so a stalled stream still stops promptly; partial text is dropped.
    async fn generate_answer(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        cancel.check().map_err(|_| ProviderError::Cancelled)?;
        let mut stream = self.stream_answer(request, cancel).await?;
        let mut answer = String::new();

        loop {
            cancel.check().map_err(|_| ProviderError::Cancelled)?;
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(delta)) => answer.push_str(&delta),
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }

        let answer = answer.trim().to_string();
        if answer.is_empty() {
            return Err(ProviderError::NoContent);
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Scripted {
        deltas: Vec<&'static str>,
        stall: bool,
    }

    #[async_trait::async_trait]
    impl GenerationProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        async fn stream_answer(
            &self,
            _request: &GenerationRequest,
            _cancel: &CancellationToken,
        ) -> Result<AnswerStream, ProviderError> {
            let items: Vec<Result<String, ProviderError>> =
                self.deltas.iter().map(|d| Ok(d.to_string())).collect();
            let head = futures::stream::iter(items);
            if self.stall {
                Ok(head.chain(futures::stream::pending()).boxed())
            } else {
                Ok(head.boxed())
            }
        }

        async fn summarize(&self, _history: &[HistoryEntry]) -> Result<String, ProviderError> {
            Ok("digest".to_string())
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            question: "q".to_string(),
            context: "c".to_string(),
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn collects_stream() {
        let provider = Scripted {
            deltas: vec!["Paris ", "is the ", "capital."],
            stall: false,
        };
        let answer = provider
            .generate_answer(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer, "Paris is the capital.");
    }

    #[tokio::test]
    async fn empty_stream_is_no_content() {
        let provider = Scripted {
            deltas: vec!["  "],
            stall: false,
        };
        let err = provider
            .generate_answer(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NoContent));
    }

    #[tokio::test]
    async fn stalled_stream_aborts_on_cancel() {
        let provider = Scripted {
            deltas: vec!["partial"],
            stall: true,
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            provider.generate_answer(&request(), &cancel),
        )
        .await
        .expect("cancel should interrupt the stall");
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }
}
