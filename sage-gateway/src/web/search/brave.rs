use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

use super::{ExternalHit, ExternalSearchProvider, SearchError};

const LABEL: &str = "Brave Search";

#[derive(Debug)]
pub struct BraveSearchProvider {
    client: reqwest::Client,
    base_url: String,
    max_results: usize,
    timeout: Duration,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl BraveSearchProvider {
    pub fn new(
        api_key: String,
        max_results: usize,
        timeout: Duration,
        min_interval: Duration,
    ) -> Result<Self, SearchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Subscription-Token",
            HeaderValue::from_str(&api_key)
                .map_err(|_| SearchError::MissingApiKey("BRAVE_API_KEY"))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: "https://api.search.brave.com/res/v1/web/search".to_string(),
            max_results: max_results.clamp(1, 20),
            timeout,
            min_interval,
            last_request: Mutex::new(None),
        })
    }

    async fn wait_for_slot(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn execute_request(&self, query: &str) -> Result<Option<ExternalHit>, SearchError> {
        self.wait_for_slot().await;

        let response = self
            .client
            .get(&self.base_url)
            .timeout(self.timeout)
            .query(&[("q", query)])
            .query(&[("count", self.max_results.to_string())])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_millis(1100));
            return Err(SearchError::RateLimited(retry_after));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::RequestFailed(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let payload: BraveSearchResponse = response.json().await?;
        Ok(render_results(payload, self.max_results))
    }

    async fn execute_with_backoff(&self, query: &str) -> Result<Option<ExternalHit>, SearchError> {
        match self.execute_request(query).await {
            Ok(hit) => Ok(hit),
            Err(SearchError::RateLimited(delay)) => {
                debug!(?delay, "brave rate limited; retrying once");
                sleep(delay).await;
                self.execute_request(query).await
            }
            Err(err) => Err(err),
        }
    }
}

/// One block per result: title, url and description separated by newlines.
fn render_results(payload: BraveSearchResponse, max_results: usize) -> Option<ExternalHit> {
    let blocks: Vec<String> = payload
        .web
        .and_then(|web| web.results)
        .unwrap_or_default()
        .into_iter()
        .take(max_results)
        .map(|item| {
            let mut block = item.title.unwrap_or_else(|| "(untitled)".to_string());
            if let Some(url) = item.url.filter(|u| !u.is_empty()) {
                block.push('\n');
                block.push_str(&url);
            }
            if let Some(description) = item.description.filter(|d| !d.trim().is_empty()) {
                block.push('\n');
                block.push_str(description.trim());
            }
            block
        })
        .collect();

    if blocks.is_empty() {
        None
    } else {
        Some(ExternalHit::new(LABEL, blocks.join("\n\n")))
    }
}

#[async_trait::async_trait]
impl ExternalSearchProvider for BraveSearchProvider {
    fn label(&self) -> &str {
        LABEL
    }

    async fn search(&self, query: &str) -> Result<Option<ExternalHit>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(None);
        }
        self.execute_with_backoff(query).await
    }
}

#[derive(Debug, Deserialize)]
struct BraveSearchResponse {
    #[serde(default)]
    web: Option<BraveWebResults>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResults {
    #[serde(default)]
    results: Option<Vec<BraveWebResult>>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(flatten)]
    _extra: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_results() {
        let payload: BraveSearchResponse = serde_json::from_str(
            r#"{"web":{"results":[
                {"title":"Rust","url":"https://www.rust-lang.org","description":"A language."},
                {"title":"Tokio","url":"https://tokio.rs"},
                {"title":"Ignored","url":"https://example.com"}
            ]}}"#,
        )
        .unwrap();
        let hit = render_results(payload, 2).unwrap();
        assert_eq!(hit.label, "Brave Search");
        insta::assert_snapshot!(hit.text, @r"
        Rust
        https://www.rust-lang.org
        A language.

        Tokio
        https://tokio.rs
        ");
    }

    #[test]
    fn test_no_results_is_none() {
        let payload: BraveSearchResponse = serde_json::from_str(r#"{"query":{}}"#).unwrap();
        assert!(render_results(payload, 5).is_none());
    }

    #[tokio::test]
    async fn test_min_interval_spaces_requests() {
        let provider = BraveSearchProvider::new(
            "key".to_string(),
            5,
            Duration::from_secs(1),
            Duration::from_millis(30),
        )
        .unwrap();
        let start = Instant::now();
        provider.wait_for_slot().await;
        provider.wait_for_slot().await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
