//! Ollama `/api/chat` client (NDJSON streaming).

use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::conversation::HistoryEntry;
use crate::prompt::{PromptMessage, answer_messages, render_transcript, summary_messages};
use crate::providers::provider::{
    AnswerStream, GenerationProvider, GenerationRequest, ProviderError,
};
use crate::providers::stream::byte_lines;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

#[derive(Clone)]
pub struct OllamaClient {
    http_client: reqwest::Client,
    model: String,
    base_url: String,
    max_tokens: u32,
    summary_max_tokens: u32,
    temperature: f32,
    request_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
}

/// One NDJSON line, also the shape of a non-streaming reply.
#[derive(Debug, Deserialize)]
struct ChatResponseLine {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, PartialEq)]
enum NdjsonLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_ndjson_line(line: &str) -> Result<NdjsonLine, ProviderError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(NdjsonLine::Skip);
    }

    let parsed: ChatResponseLine = serde_json::from_str(line)?;
    if let Some(message) = parsed.error {
        return Err(ProviderError::ApiError { message });
    }

    let content = parsed.message.map(|m| m.content).unwrap_or_default();
    match (content.is_empty(), parsed.done) {
        (false, _) => Ok(NdjsonLine::Delta(content)),
        (true, true) => Ok(NdjsonLine::Done),
        (true, false) => Ok(NdjsonLine::Skip),
    }
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http_client,
            model: model.into(),
            base_url: base_url.into(),
            max_tokens: 1000,
            summary_max_tokens: 250,
            temperature: 0.2,
            request_timeout: Duration::from_secs(120),
        })
    }

    /// Set answer and summary token limits and sampling temperature.
    pub fn with_limits(mut self, max_tokens: u32, summary_max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.summary_max_tokens = summary_max_tokens;
        self.temperature = temperature;
        self
    }

    /// Timeout for non-streaming requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    fn convert_messages(messages: Vec<PromptMessage>) -> Vec<OllamaMessage> {
        messages
            .into_iter()
            .map(|m| OllamaMessage {
                role: m.role.as_str().to_string(),
                content: m.content,
            })
            .collect()
    }

    async fn post(&self, body: &ChatRequest) -> Result<reqwest::Response, ProviderError> {
        let mut request = self.http_client.post(self.chat_url()).json(body);
        if !body.stream {
            request = request.timeout(self.request_timeout);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                message: format!("{} - {}", status, error_text),
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl GenerationProvider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_answer(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<AnswerStream, ProviderError> {
        let messages = answer_messages(request);
        debug!(model = %self.model, prompt = %render_transcript(&messages), "ollama answer prompt");

        let body = ChatRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(messages),
            stream: true,
            options: ChatOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        cancel.check().map_err(|_| ProviderError::Cancelled)?;
        let response = self.post(&body).await?;

        let stream = byte_lines(response.bytes_stream())
            .map(|line| line.and_then(|line| parse_ndjson_line(&line)))
            .take_while(|item| futures::future::ready(!matches!(item, Ok(NdjsonLine::Done))))
            .filter_map(|item| {
                futures::future::ready(match item {
                    Ok(NdjsonLine::Delta(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(err) => Some(Err(err)),
                })
            })
            .boxed();
        Ok(stream)
    }

    async fn summarize(&self, history: &[HistoryEntry]) -> Result<String, ProviderError> {
        if history.is_empty() {
            return Ok(String::new());
        }

        let body = ChatRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(summary_messages(history)),
            stream: false,
            options: ChatOptions {
                temperature: 0.1,
                num_predict: self.summary_max_tokens,
            },
        };

        let response = self.post(&body).await?;
        let payload: ChatResponseLine = response.json().await?;
        if let Some(message) = payload.error {
            return Err(ProviderError::ApiError { message });
        }
        payload
            .message
            .map(|m| m.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ProviderError::NoContent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ndjson_lines() {
        assert_eq!(
            parse_ndjson_line(r#"{"message":{"role":"assistant","content":"Ber"},"done":false}"#)
                .unwrap(),
            NdjsonLine::Delta("Ber".to_string())
        );
        assert_eq!(
            parse_ndjson_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#)
                .unwrap(),
            NdjsonLine::Done
        );
        assert_eq!(parse_ndjson_line("   ").unwrap(), NdjsonLine::Skip);
        assert!(matches!(
            parse_ndjson_line(r#"{"error":"model not found"}"#),
            Err(ProviderError::ApiError { message }) if message == "model not found"
        ));
        assert!(matches!(
            parse_ndjson_line("not json"),
            Err(ProviderError::Serialization(_))
        ));
    }

    #[test]
    fn test_chat_url() {
        let client = OllamaClient::new("http://gpu:11434/", "llama3.1").unwrap();
        assert_eq!(client.chat_url(), "http://gpu:11434/api/chat");
    }
}
