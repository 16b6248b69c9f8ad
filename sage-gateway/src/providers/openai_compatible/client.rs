//! OpenAI-compatible Chat Completions client.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::conversation::HistoryEntry;
use crate::prompt::{PromptMessage, answer_messages, render_transcript, summary_messages};
use crate::providers::provider::{
    AnswerStream, GenerationProvider, GenerationRequest, ProviderError,
};
use crate::providers::stream::byte_lines;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible API client.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http_client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    max_tokens: u32,
    summary_max_tokens: u32,
    temperature: f32,
    request_timeout: Duration,
}

/// Request body for the Chat Completions API
#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

/// OpenAI-compatible message format
#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

/// Non-streaming response
#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: OpenAiMessage,
}

/// One `data:` payload of a streamed response
#[derive(Debug, Deserialize)]
struct ChatCompletionsChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// What one SSE line means for the answer.
#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, ProviderError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: ChatCompletionsChunk = serde_json::from_str(data)?;
    if let Some(error) = chunk.error {
        return Err(ProviderError::ApiError {
            message: error.message,
        });
    }

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();
    if text.is_empty() {
        Ok(SseLine::Skip)
    } else {
        Ok(SseLine::Delta(text))
    }
}

impl OpenAiCompatibleClient {
    /// Create a new OpenAI-compatible client.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http_client,
            api_key,
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

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &self.api_key {
            let auth_value = format!("Bearer {}", api_key);
            if let Ok(header_value) = HeaderValue::from_str(&auth_value) {
                headers.insert(AUTHORIZATION, header_value);
            }
        }
        headers
    }

    fn chat_completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    fn convert_messages(messages: Vec<PromptMessage>) -> Vec<OpenAiMessage> {
        messages
            .into_iter()
            .map(|m| OpenAiMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content),
            })
            .collect()
    }

    async fn post(&self, body: &ChatCompletionsRequest) -> Result<reqwest::Response, ProviderError> {
        let mut request = self
            .http_client
            .post(self.chat_completions_url())
            .headers(self.build_headers())
            .json(body);
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
impl GenerationProvider for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        "openai_compatible"
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
        debug!(model = %self.model, prompt = %render_transcript(&messages), "openai_compatible answer prompt");

        let body = ChatCompletionsRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(messages),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
        };

        cancel.check().map_err(|_| ProviderError::Cancelled)?;
        let response = self.post(&body).await?;

        let stream = byte_lines(response.bytes_stream())
            .map(|line| line.and_then(|line| parse_sse_line(&line)))
            .take_while(|item| futures::future::ready(!matches!(item, Ok(SseLine::Done))))
            .filter_map(|item| {
                futures::future::ready(match item {
                    Ok(SseLine::Delta(text)) => Some(Ok(text)),
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

        let body = ChatCompletionsRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(summary_messages(history)),
            max_tokens: self.summary_max_tokens,
            temperature: 0.1,
            stream: false,
        };

        let response = self.post(&body).await?;
        let payload: ChatCompletionsResponse = response.json().await?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ProviderError::NoContent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_completions_url() {
        let client = OpenAiCompatibleClient::new("http://localhost:8080/v1/", None, "m").unwrap();
        assert_eq!(
            client.chat_completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
        let client = OpenAiCompatibleClient::new("http://localhost:8080", None, "m").unwrap();
        assert_eq!(
            client.chat_completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_parse_sse_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Par"}}]}"#).unwrap(),
            SseLine::Delta("Par".to_string())
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseLine::Skip
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line("").unwrap(), SseLine::Skip);
    }

    #[test]
    fn test_parse_sse_error_payload() {
        let err = parse_sse_line(r#"data: {"error":{"message":"overloaded"}}"#).unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { message } if message == "overloaded"));
    }

    #[test]
    fn test_auth_header_only_with_key() {
        let client = OpenAiCompatibleClient::new(DEFAULT_BASE_URL, None, "m").unwrap();
        assert!(client.build_headers().get(AUTHORIZATION).is_none());
        let client =
            OpenAiCompatibleClient::new(DEFAULT_BASE_URL, Some("sk".to_string()), "m").unwrap();
        assert_eq!(client.build_headers()[AUTHORIZATION], "Bearer sk");
    }
}
