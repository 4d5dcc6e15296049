//! Deduplication gate: drops drafts whose slug or source URL already exists.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use obituary_shared::{ObituaryDraft, Result, normalize_source_url};
use obituary_storage::ContentStore;

/// Drafts split into those to persist and those already known.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    pub new: Vec<ObituaryDraft>,
    pub duplicates: Vec<ObituaryDraft>,
}

/// Checks a batch of drafts against the store in a single query.
#[derive(Clone)]
pub struct DedupGate {
    store: Arc<dyn ContentStore>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// A draft is a duplicate if its slug or normalized source URL exists in
    /// the store, or was already accepted earlier in this batch.
    #[instrument(skip_all, fields(count = drafts.len()))]
    pub async fn partition(&self, drafts: Vec<ObituaryDraft>) -> Result<DedupOutcome> {
        if drafts.is_empty() {
            return Ok(DedupOutcome::default());
        }

        let slugs: Vec<String> = drafts.iter().map(|d| d.slug.clone()).collect();
        let urls: Vec<String> = drafts
            .iter()
            .map(|d| normalize_source_url(&d.source_url))
            .collect();
        let existing = self.store.existing_keys(&slugs, &urls).await?;

        let mut seen_slugs: HashSet<String> = HashSet::new();
        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut outcome = DedupOutcome::default();

        for (draft, url) in drafts.into_iter().zip(urls) {
            let known = existing.slugs.contains(&draft.slug) || existing.urls.contains(&url);
            let repeated = seen_slugs.contains(&draft.slug) || seen_urls.contains(&url);
            if known || repeated {
                debug!(slug = %draft.slug, known, repeated, "duplicate draft");
                outcome.duplicates.push(draft);
            } else {
                seen_slugs.insert(draft.slug.clone());
                seen_urls.insert(url);
                outcome.new.push(draft);
            }
        }

        info!(
            new = outcome.new.len(),
            duplicates = outcome.duplicates.len(),
            "dedup complete"
        );
        Ok(outcome)
    }
}
