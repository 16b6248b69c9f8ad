use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

use super::{ExternalHit, ExternalSearchProvider, SearchError};

const LABEL: &str = "Wikipedia";

/// MediaWiki full-text search followed by a plain-text extract of the best page.
#[derive(Debug, Clone)]
pub struct WikipediaSearchProvider {
    client: reqwest::Client,
    endpoint: String,
    max_chars: usize,
    timeout: Duration,
}

impl WikipediaSearchProvider {
    pub fn new(lang: &str, max_chars: usize, timeout: Duration) -> Result<Self, SearchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("sage/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        let lang = lang.trim();
        let lang = if lang.is_empty() { "en" } else { lang };
        Ok(Self {
            client,
            endpoint: format!("https://{}.wikipedia.org/w/api.php", lang),
            max_chars: max_chars.max(1),
            timeout,
        })
    }

    /// Point at another MediaWiki installation.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        params: &[(&str, &str)],
    ) -> Result<T, SearchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .timeout(self.timeout)
            .query(&[("format", "json"), ("formatversion", "2")])
            .query(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::RequestFailed(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }

    async fn top_title(&self, query: &str) -> Result<Option<String>, SearchError> {
        let payload: SearchResponse = self
            .get(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", "1"),
            ])
            .await?;
        Ok(payload
            .query
            .and_then(|q| q.search.into_iter().next())
            .map(|hit| hit.title))
    }

    async fn extract(&self, title: &str) -> Result<Option<String>, SearchError> {
        let payload: ExtractResponse = self
            .get(&[
                ("action", "query"),
                ("prop", "extracts"),
                ("explaintext", "1"),
                ("redirects", "1"),
                ("titles", title),
            ])
            .await?;
        Ok(payload
            .query
            .and_then(|q| q.pages.into_iter().next())
            .and_then(|page| page.extract)
            .filter(|extract| !extract.trim().is_empty()))
    }
}

/// `Page: ...` / `Summary: ...` layout, cut to `max_chars` characters.
fn format_page(title: &str, extract: &str, max_chars: usize) -> String {
    let text = format!("Page: {}\nSummary: {}", title, extract.trim());
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}

#[async_trait::async_trait]
impl ExternalSearchProvider for WikipediaSearchProvider {
    fn label(&self) -> &str {
        LABEL
    }

    async fn search(&self, query: &str) -> Result<Option<ExternalHit>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(None);
        }

        let Some(title) = self.top_title(query).await? else {
            debug!(query, "wikipedia search returned no pages");
            return Ok(None);
        };
        let Some(extract) = self.extract(&title).await? else {
            debug!(query, title, "wikipedia page has no extract");
            return Ok(None);
        };

        Ok(Some(ExternalHit::new(
            LABEL,
            format_page(&title, &extract, self.max_chars),
        )))
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    query: Option<ExtractQuery>,
}

#[derive(Debug, Deserialize)]
struct ExtractQuery {
    #[serde(default)]
    pages: Vec<ExtractPage>,
}

#[derive(Debug, Deserialize)]
struct ExtractPage {
    #[serde(default)]
    extract: Option<String>,
}
