use std::sync::Arc;
use std::time::Duration;

use sage_core::ExternalSettings;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::web::cache::TimedCache;

pub mod brave;
pub mod wikipedia;

pub use brave::BraveSearchProvider;
pub use wikipedia::WikipediaSearchProvider;

/// Text found by an external provider together with its attribution label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalHit {
    pub label: String,
    pub text: String,
}

impl ExternalHit {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }

    /// Non-blank and not one of the providers' canned "nothing found" replies.
    pub fn is_usable(&self) -> bool {
        !self.text.trim().is_empty() && !is_no_results_marker(&self.text)
    }
}

/// Canned openings of "nothing found" replies.
const NO_RESULTS_MARKERS: &[&str] = &[
    "no good wikipedia",
    "no good results",
    "no good search result",
];

/// Matches replies such as "No good Wikipedia Search Result was found".
/// Only the start of the reply is compared.
pub fn is_no_results_marker(text: &str) -> bool {
    let lower = text.trim_start().to_lowercase();
    NO_RESULTS_MARKERS.iter().any(|marker| lower.starts_with(marker))
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("missing API key ({0})")]
    MissingApiKey(&'static str),
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),
    #[error("request failed: {0}")]
    RequestFailed(String),
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        SearchError::RequestFailed(err.to_string())
    }
}

#[async_trait::async_trait]
pub trait ExternalSearchProvider: Send + Sync {
    /// Attribution label shown next to answers built from this provider.
    fn label(&self) -> &str;

    /// `Ok(None)` when the provider found nothing.
    async fn search(&self, query: &str) -> Result<Option<ExternalHit>, SearchError>;
}

/// Ordered external providers with a shared response cache.
pub struct ExternalSearch {
    providers: Vec<Arc<dyn ExternalSearchProvider>>,
    cache: TimedCache<String, Option<ExternalHit>>,
}

impl ExternalSearch {
    /// `providers` are consulted in the given order.
    pub fn new(providers: Vec<Arc<dyn ExternalSearchProvider>>, cache_ttl: Duration) -> Self {
        Self {
            providers,
            cache: TimedCache::new(cache_ttl),
        }
    }

    /// Wikipedia first, then Brave when enabled and keyed.
    pub fn from_settings(
        settings: &ExternalSettings,
        brave_api_key: Option<&str>,
    ) -> Result<Self, SearchError> {
        let timeout = Duration::from_secs(settings.timeout_seconds);
        let mut providers: Vec<Arc<dyn ExternalSearchProvider>> = Vec::new();

        if settings.wikipedia.enabled {
            providers.push(Arc::new(WikipediaSearchProvider::new(
                &settings.wikipedia.lang,
                settings.wikipedia.max_chars,
                timeout,
            )?));
        }

        if settings.brave.enabled {
            match brave_api_key {
                Some(key) => providers.push(Arc::new(BraveSearchProvider::new(
                    key.to_string(),
                    settings.brave.max_results,
                    timeout,
                    Duration::from_millis(settings.brave.min_interval_ms),
                )?)),
                None => warn!("Brave search enabled without BRAVE_API_KEY; skipping it"),
            }
        }

        let search = Self::new(
            providers,
            Duration::from_secs(settings.cache_ttl_minutes.saturating_mul(60)),
        );
        info!(providers = ?search.labels(), "external search initialized");
        Ok(search)
    }

    pub fn providers(&self) -> &[Arc<dyn ExternalSearchProvider>] {
        &self.providers
    }

    pub fn labels(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.label()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Query one provider through the cache. Errors are not cached.
    pub async fn search_with(
        &self,
        provider: &dyn ExternalSearchProvider,
        query: &str,
    ) -> Result<Option<ExternalHit>, SearchError> {
        let cache_key = format!("{}|{}", provider.label(), query.trim());
        if let Some(cached) = self.cache.get(&cache_key).await {
            return Ok(cached);
        }

        let response = provider.search(query).await?;
        self.cache.set(cache_key, response.clone()).await;
        Ok(response)
    }
}
