//! In-memory fakes shared by this crate's tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use obituary_discovery::{ProviderResult, SearchBackend, SearchCategory, SearchRequest};
use obituary_shared::{
    Candidate, CapabilityContext, Category, ClassificationResult, DiscoveryMeta, OBITUARY_DOC_TYPE,
    ObituaryDraft, ObituaryError, Result, SourceType, normalize_source_url,
};
use obituary_storage::{ContentStore, ExistingKeys};

use crate::classifier::{ClassificationService, ModelVerdict};

/// A minimal draft with the given slug and source URL.
pub fn draft(slug: &str, url: &str) -> ObituaryDraft {
    ObituaryDraft {
        id: ObituaryDraft::id_for_slug(slug),
        doc_type: OBITUARY_DOC_TYPE.into(),
        claim: format!("claim {slug}"),
        source_name: "X".into(),
        source_url: url.into(),
        date: "2025-01-01".parse().unwrap(),
        categories: vec![Category::Dismissive],
        context: CapabilityContext::default(),
        slug: slug.into(),
        discovery: DiscoveryMeta {
            discovered_at: Utc::now(),
            confidence: 0.9,
            notability_reason: String::new(),
            source_type: SourceType::Social,
        },
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    drafts: Mutex<HashMap<String, ObituaryDraft>>,
    failing: HashSet<String>,
    unreachable: bool,
    key_queries: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Default::default()
        }
    }

    /// Writes for these slugs fail.
    pub fn failing_slugs(mut self, slugs: &[&str]) -> Self {
        self.failing = slugs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn insert(&self, draft: ObituaryDraft) {
        self.drafts.lock().unwrap().insert(draft.id.clone(), draft);
    }

    pub fn len(&self) -> usize {
        self.drafts.lock().unwrap().len()
    }

    pub fn key_queries(&self) -> usize {
        self.key_queries.load(Ordering::SeqCst)
    }

    /// Write attempts, successful or not.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable {
            return Err(ObituaryError::Storage("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check_reachable()
    }

    async fn existing_keys(&self, slugs: &[String], urls: &[String]) -> Result<ExistingKeys> {
        self.check_reachable()?;
        self.key_queries.fetch_add(1, Ordering::SeqCst);
        let drafts = self.drafts.lock().unwrap();
        let mut keys = ExistingKeys::default();
        for d in drafts.values() {
            if slugs.contains(&d.slug) {
                keys.slugs.insert(d.slug.clone());
            }
            let url = normalize_source_url(&d.source_url);
            if urls.contains(&url) {
                keys.urls.insert(url);
            }
        }
        Ok(keys)
    }

    async fn create_or_replace(&self, draft: &ObituaryDraft) -> Result<String> {
        self.check_reachable()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&draft.slug) {
            return Err(ObituaryError::Storage(format!("write rejected for {}", draft.slug)));
        }
        self.insert(draft.clone());
        Ok(draft.id.clone())
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Returns fixed hits per vertical and counts calls.
#[derive(Default)]
pub struct FixedSearch {
    pub social: Vec<ProviderResult>,
    pub news: Vec<ProviderResult>,
    calls: AtomicUsize,
}

impl FixedSearch {
    pub fn social(hits: Vec<ProviderResult>) -> Self {
        Self {
            social: hits,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for FixedSearch {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<ProviderResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(match request.category {
            SearchCategory::Tweet => self.social.clone(),
            SearchCategory::News => self.news.clone(),
        })
    }
}

/// A social hit for `https://x.com/<user>/status/<n>` with the given text.
pub fn social_hit(n: usize, text: &str) -> ProviderResult {
    ProviderResult {
        url: format!("https://x.com/user{n}/status/{n}"),
        title: Some(format!("post {n}")),
        text: Some(text.into()),
        published_date: Some("2025-03-02T10:00:00.000Z".into()),
        author: None,
        score: None,
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Echoes the candidate text as the claim with a fixed confidence, except for
/// texts listed in `low`, which come back at 0.2.
#[derive(Default)]
pub struct EchoClassifier {
    pub low: HashSet<String>,
    calls: AtomicUsize,
}

impl EchoClassifier {
    pub fn with_low(texts: &[&str]) -> Self {
        Self {
            low: texts.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassificationService for EchoClassifier {
    async fn classify(&self, candidate: &Candidate) -> Result<ModelVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let confidence = if self.low.contains(&candidate.text) { 0.2 } else { 0.9 };
        Ok(ModelVerdict::Claim(ClassificationResult {
            claim: candidate.text.clone(),
            confidence,
            category: Category::Capability,
            notability_reason: "test".into(),
        }))
    }
}
