//! Search provider adapter: finds fresh claims on social and news verticals.
//!
//! Both sub-searches share one query derived from [`KEYWORDS`] and run
//! concurrently. Each one degrades to an empty result set when the provider
//! is not configured or fails, so discovery can yield zero candidates but
//! never aborts a run.

mod provider;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use url::Url;

use obituary_shared::{Author, Candidate, SourceType};

pub use provider::{ExaClient, ProviderResult, SearchBackend, SearchCategory, SearchRequest};

/// Curated search keywords, most productive first.
pub const KEYWORDS: &[&str] = &[
    "AI bubble",
    "AI winter",
    "AI is overhyped",
    "AI hitting a wall",
    "LLMs have plateaued",
    "AI hype is over",
    "scaling laws are dead",
    "AGI is a myth",
    "AI is a fad",
    "deep learning is hitting a wall",
    "generative AI is a dead end",
    "AI will never",
    "stochastic parrots",
    "AI progress is slowing",
];

/// How many of [`KEYWORDS`] go into the query.
pub const QUERY_KEYWORD_COUNT: usize = 8;

/// News domains searched, with their publication names.
pub const NEWS_DOMAINS: &[(&str, &str)] = &[
    ("nytimes.com", "The New York Times"),
    ("wsj.com", "The Wall Street Journal"),
    ("ft.com", "Financial Times"),
    ("bloomberg.com", "Bloomberg"),
    ("reuters.com", "Reuters"),
    ("theverge.com", "The Verge"),
    ("wired.com", "WIRED"),
    ("techcrunch.com", "TechCrunch"),
    ("arstechnica.com", "Ars Technica"),
    ("theatlantic.com", "The Atlantic"),
    ("theguardian.com", "The Guardian"),
    ("economist.com", "The Economist"),
    ("cnbc.com", "CNBC"),
    ("businessinsider.com", "Business Insider"),
    ("technologyreview.com", "MIT Technology Review"),
];

/// Hosts serving social posts.
pub const SOCIAL_DOMAINS: &[&str] = &["x.com", "twitter.com"];

/// Top-level path segments on social hosts that are not user handles.
const RESERVED_SOCIAL_PATHS: &[&str] = &[
    "i", "home", "search", "hashtag", "explore", "intent", "share", "settings",
];

/// Default per-sub-search result cap.
pub const DEFAULT_MAX_RESULTS: u32 = 50;

// ---------------------------------------------------------------------------
// Query and domain helpers
// ---------------------------------------------------------------------------

/// The shared query string: the first [`QUERY_KEYWORD_COUNT`] keywords OR-ed.
pub fn build_query() -> String {
    KEYWORDS
        .iter()
        .take(QUERY_KEYWORD_COUNT)
        .copied()
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Lowercased host of `url` with any leading `www.` removed.
pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Whether `host` is one of `domains` or a subdomain of one.
pub fn domain_matches<'a>(host: &str, domains: impl IntoIterator<Item = &'a str>) -> bool {
    domains
        .into_iter()
        .any(|d| host == d || host.ends_with(&format!(".{d}")))
}

/// Whether a news host is on the allowlist.
pub fn is_allowed_news_host(host: &str) -> bool {
    domain_matches(host, NEWS_DOMAINS.iter().map(|(d, _)| *d))
}

/// Publication name for an allowlisted news host.
pub fn publication_name(host: &str) -> Option<&'static str> {
    NEWS_DOMAINS
        .iter()
        .find(|(d, _)| host == *d || host.ends_with(&format!(".{d}")))
        .map(|(_, name)| *name)
}

/// Extract the author handle from a social post URL
/// (`https://x.com/<handle>/status/...`).
pub fn extract_handle(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = host_of(url)?;
    let host = host.strip_prefix("mobile.").unwrap_or(&host);
    if !SOCIAL_DOMAINS.contains(&host) {
        return None;
    }
    let segment = parsed.path_segments()?.find(|s| !s.is_empty())?;
    if RESERVED_SOCIAL_PATHS.contains(&segment.to_ascii_lowercase().as_str()) {
        return None;
    }
    Some(segment.trim_start_matches('@').to_string())
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Issues the two sub-searches and normalizes their results into candidates.
#[derive(Clone)]
pub struct SearchAdapter {
    backend: Option<Arc<dyn SearchBackend>>,
    max_results: u32,
}

impl SearchAdapter {
    /// `backend` is `None` when no search credentials are configured.
    pub fn new(backend: Option<Arc<dyn SearchBackend>>, max_results: u32) -> Self {
        Self {
            backend,
            max_results,
        }
    }

    /// Union of social and news candidates published since `since`.
    #[instrument(skip_all, fields(since = %since))]
    pub async fn search_candidates(&self, since: DateTime<Utc>) -> Vec<Candidate> {
        let query = build_query();
        let fallback_time = Utc::now();

        let news_domains: Vec<String> = NEWS_DOMAINS.iter().map(|(d, _)| d.to_string()).collect();
        let social = SearchRequest {
            query: query.clone(),
            category: SearchCategory::Tweet,
            since,
            max_results: self.max_results,
            include_domains: None,
            include_text: true,
        };
        let news = SearchRequest {
            query,
            category: SearchCategory::News,
            since,
            max_results: self.max_results,
            include_domains: Some(news_domains),
            include_text: true,
        };

        let (social_hits, news_hits) =
            tokio::join!(self.sub_search(&social), self.sub_search(&news));

        let mut candidates: Vec<Candidate> = social_hits
            .into_iter()
            .filter_map(|hit| normalize(hit, SourceType::Social, fallback_time))
            .collect();
        let social_count = candidates.len();
        candidates.extend(
            news_hits
                .into_iter()
                .filter_map(|hit| normalize(hit, SourceType::News, fallback_time)),
        );

        info!(
            social = social_count,
            news = candidates.len() - social_count,
            "search complete"
        );
        candidates
    }

    /// One sub-search, degrading to empty on absence or failure.
    async fn sub_search(&self, request: &SearchRequest) -> Vec<ProviderResult> {
        let Some(backend) = &self.backend else {
            debug!(category = ?request.category, "search backend not configured, skipping");
            return Vec::new();
        };

        match backend.search(request).await {
            Ok(mut hits) => {
                hits.truncate(request.max_results as usize);
                hits
            }
            Err(e) => {
                warn!(category = ?request.category, error = %e, "sub-search failed, continuing without it");
                Vec::new()
            }
        }
    }
}

/// Turn a provider hit into a [`Candidate`]. Hits without a usable URL are dropped.
fn normalize(hit: ProviderResult, source_type: SourceType, fallback_time: DateTime<Utc>) -> Option<Candidate> {
    if Url::parse(&hit.url).is_err() {
        debug!(url = %hit.url, "dropping result with invalid URL");
        return None;
    }

    let text = hit.text.unwrap_or_default();
    let title = match hit.title.filter(|t| !t.trim().is_empty()) {
        Some(title) => title.trim().to_string(),
        None => text.chars().take(80).collect::<String>().trim().to_string(),
    };
    let published_at = hit
        .published_date
        .as_deref()
        .and_then(parse_published)
        .unwrap_or(fallback_time);

    let name = hit.author.filter(|a| !a.trim().is_empty());
    let handle = match source_type {
        SourceType::Social => extract_handle(&hit.url),
        SourceType::News => None,
    };
    let author = (name.is_some() || handle.is_some()).then_some(Author { name, handle });

    Some(Candidate {
        url: hit.url,
        title,
        text,
        published_at,
        author,
        source_type,
        score: hit.score,
    })
}

/// Accept RFC 3339 timestamps or bare `YYYY-MM-DD` dates.
fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
