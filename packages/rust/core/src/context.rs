//! Context enrichment: turns an approved candidate into a draft with the
//! capability snapshot that was current when the claim was made.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use obituary_discovery::{host_of, publication_name};
use obituary_shared::{
    Candidate, CapabilityContext, ClassifiedCandidate, DiscoveryMeta, OBITUARY_DOC_TYPE,
    ObituaryDraft, ObituaryError, Result, SourceType,
};

use crate::slug::slug_for;

/// One point on the capability timeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CapabilitySnapshot {
    pub date: NaiveDate,
    pub frontier_model: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// Read-only lookup of capability metrics by date.
#[derive(Debug, Clone)]
pub struct ContextEnricher {
    /// Sorted by date, ascending.
    timeline: Vec<CapabilitySnapshot>,
}

impl ContextEnricher {
    pub fn new(mut timeline: Vec<CapabilitySnapshot>) -> Self {
        timeline.sort_by_key(|s| s.date);
        Self { timeline }
    }

    /// The timeline compiled into the binary.
    pub fn builtin() -> Self {
        let snap = |date: &str, model: &str, metrics: &[(&str, f64)]| CapabilitySnapshot {
            date: date.parse().unwrap_or_default(),
            frontier_model: model.to_string(),
            metrics: metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        };
        Self::new(vec![
            snap("2020-06-11", "GPT-3", &[("mmlu", 43.9)]),
            snap("2022-11-30", "ChatGPT (GPT-3.5)", &[("mmlu", 70.0), ("humaneval", 48.1)]),
            snap("2023-03-14", "GPT-4", &[("mmlu", 86.4), ("humaneval", 67.0)]),
            snap(
                "2024-03-04",
                "Claude 3 Opus",
                &[("mmlu", 86.8), ("humaneval", 84.9), ("gpqa", 50.4)],
            ),
            snap(
                "2024-05-13",
                "GPT-4o",
                &[("mmlu", 88.7), ("humaneval", 90.2), ("gpqa", 53.6)],
            ),
            snap(
                "2024-06-20",
                "Claude 3.5 Sonnet",
                &[("mmlu", 88.7), ("humaneval", 92.0), ("gpqa", 59.4)],
            ),
            snap("2024-12-05", "o1", &[("mmlu", 91.8), ("gpqa", 78.0)]),
            snap(
                "2025-02-24",
                "Claude 3.7 Sonnet",
                &[("gpqa", 84.8), ("swe_bench_verified", 70.3)],
            ),
        ])
    }

    /// Load a timeline from a JSON array of snapshots.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ObituaryError::io(path, e))?;
        let timeline: Vec<CapabilitySnapshot> = serde_json::from_str(&raw).map_err(|e| {
            ObituaryError::parse(format!("invalid metrics timeline {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), snapshots = timeline.len(), "loaded metrics timeline");
        Ok(Self::new(timeline))
    }

    /// Metrics from the latest snapshot on or before `date`; empty before the first.
    pub fn metrics_for(&self, date: NaiveDate) -> CapabilityContext {
        let idx = self.timeline.partition_point(|s| s.date <= date);
        match idx.checked_sub(1).and_then(|i| self.timeline.get(i)) {
            Some(snapshot) => CapabilityContext {
                as_of: Some(snapshot.date),
                frontier_model: Some(snapshot.frontier_model.clone()),
                metrics: snapshot.metrics.clone(),
            },
            None => CapabilityContext::default(),
        }
    }

    /// Build the draft for an approved candidate. `None` for anything else.
    pub fn build_draft(
        &self,
        classified: &ClassifiedCandidate,
        discovered_at: DateTime<Utc>,
    ) -> Option<ObituaryDraft> {
        let result = classified.approved()?;
        let candidate = &classified.candidate;
        let date = candidate.published_date();
        let slug = slug_for(&result.claim, date);

        debug!(slug = %slug, url = %candidate.url, "draft built");
        Some(ObituaryDraft {
            id: ObituaryDraft::id_for_slug(&slug),
            doc_type: OBITUARY_DOC_TYPE.to_string(),
            claim: result.claim.clone(),
            source_name: source_name(candidate),
            source_url: candidate.url.clone(),
            date,
            categories: vec![result.category],
            context: self.metrics_for(date),
            slug,
            discovery: DiscoveryMeta {
                discovered_at,
                confidence: result.confidence,
                notability_reason: result.notability_reason.clone(),
                source_type: candidate.source_type,
            },
        })
    }
}

/// Human-readable attribution for a candidate.
pub fn source_name(candidate: &Candidate) -> String {
    let author = candidate.author.as_ref();
    match candidate.source_type {
        SourceType::Social => {
            if let Some(handle) = author.and_then(|a| a.handle.as_deref()) {
                format!("@{handle} on X")
            } else if let Some(name) = author.and_then(|a| a.name.as_deref()) {
                format!("{name} on X")
            } else {
                "X".to_string()
            }
        }
        SourceType::News => {
            let host = host_of(&candidate.url);
            host.as_deref()
                .and_then(publication_name)
                .map(str::to_string)
                .or(host)
                .unwrap_or_else(|| "Unknown".to_string())
        }
    }
}
