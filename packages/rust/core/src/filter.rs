//! Quality filter: cheap local rules applied before any model call.
//!
//! Pure and deterministic. Filtering an already-filtered batch is a no-op.

use std::collections::HashSet;

use tracing::{debug, info};

use obituary_discovery::{host_of, is_allowed_news_host};
use obituary_shared::{Candidate, SourceType};

/// Why a candidate was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    EmptyText,
    DisallowedDomain,
    DuplicateText,
}

/// Drop unusable candidates, keeping the first of any near-identical texts.
pub fn filter_candidates(candidates: &[Candidate]) -> Vec<Candidate> {
    let mut seen: HashSet<String> = HashSet::with_capacity(candidates.len());
    let mut kept = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        match check(candidate, &mut seen) {
            Ok(()) => kept.push(candidate.clone()),
            Err(reason) => debug!(url = %candidate.url, ?reason, "candidate filtered out"),
        }
    }

    info!(input = candidates.len(), kept = kept.len(), "quality filter applied");
    kept
}

fn check(candidate: &Candidate, seen: &mut HashSet<String>) -> Result<(), Rejection> {
    if candidate.text.trim().is_empty() {
        return Err(Rejection::EmptyText);
    }
    if !passes_domain_policy(candidate) {
        return Err(Rejection::DisallowedDomain);
    }
    if !seen.insert(normalize_text(&candidate.text)) {
        return Err(Rejection::DuplicateText);
    }
    Ok(())
}

/// News must come from the allowlist; social posts have no domain policy.
fn passes_domain_policy(candidate: &Candidate) -> bool {
    match candidate.source_type {
        SourceType::News => host_of(&candidate.url).is_some_and(|h| is_allowed_news_host(&h)),
        SourceType::Social => true,
    }
}

/// Case-insensitive, whitespace-collapsed form used for near-duplicate checks.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
