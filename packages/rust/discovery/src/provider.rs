//! Search provider backend: the wire contract of an Exa-style search API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use obituary_shared::{ObituaryError, Result};

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("ObituaryDiscovery/", env!("CARGO_PKG_VERSION"));

/// Default timeout in seconds for one search call.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Content vertical a search is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchCategory {
    Tweet,
    News,
}

/// One outbound search call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub category: SearchCategory,
    pub since: DateTime<Utc>,
    pub max_results: u32,
    /// Restrict results to these domains (news only).
    pub include_domains: Option<Vec<String>>,
    /// Ask the provider to return page text.
    pub include_text: bool,
}

/// A single provider hit, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResult {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Anything that can answer a [`SearchRequest`].
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<ProviderResult>>;
}

// ---------------------------------------------------------------------------
// Exa client
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExaSearchBody<'a> {
    query: &'a str,
    category: SearchCategory,
    start_published_date: String,
    num_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_domains: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    contents: Option<ExaContents>,
}

#[derive(Debug, Serialize)]
struct ExaContents {
    text: bool,
}

#[derive(Debug, Deserialize)]
struct ExaSearchResponse {
    #[serde(default)]
    results: Vec<ProviderResult>,
}

/// HTTP client for the Exa search API.
pub struct ExaClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl ExaClient {
    /// Build a client against `base_url` (e.g. `https://api.exa.ai`).
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ObituaryError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl SearchBackend for ExaClient {
    #[instrument(skip_all, fields(category = ?request.category, max = request.max_results))]
    async fn search(&self, request: &SearchRequest) -> Result<Vec<ProviderResult>> {
        let url = format!("{}/search", self.base_url);
        let body = ExaSearchBody {
            query: &request.query,
            category: request.category,
            start_published_date: request.since.to_rfc3339_opts(SecondsFormat::Millis, true),
            num_results: request.max_results,
            include_domains: request.include_domains.as_deref(),
            contents: request.include_text.then_some(ExaContents { text: true }),
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ObituaryError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(200).collect();
            return Err(ObituaryError::Network(format!(
                "{url}: HTTP {status}: {detail}"
            )));
        }

        let parsed: ExaSearchResponse = response
            .json()
            .await
            .map_err(|e| ObituaryError::parse(format!("invalid search response: {e}")))?;

        debug!(count = parsed.results.len(), "search returned");
        Ok(parsed.results)
    }
}
