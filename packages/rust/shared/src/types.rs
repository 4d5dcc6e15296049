//! Core domain types flowing through the discovery pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Document type tag written on every draft.
pub const OBITUARY_DOC_TYPE: &str = "obituary";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for discovery run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// Which search vertical a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Social,
    News,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Social => "social",
            Self::News => "news",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who published a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Display name as reported by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Platform handle, social posts only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

/// A discovered unit of content prior to any judgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub url: String,
    pub title: String,
    pub text: String,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    pub source_type: SourceType,
    /// Provider relevance score, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Candidate {
    /// Publication day used for context lookup and slug seeding.
    pub fn published_date(&self) -> NaiveDate {
        self.published_at.date_naive()
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Fixed set of claim categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// "AI can't do X" / "models have plateaued".
    Capability,
    /// Bubble, valuation and economic claims.
    Market,
    /// "AGI will never happen" style claims.
    Agi,
    /// General hype dismissal.
    Dismissive,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Capability,
        Category::Market,
        Category::Agi,
        Category::Dismissive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capability => "capability",
            Self::Market => "market",
            Self::Agi => "agi",
            Self::Dismissive => "dismissive",
        }
    }

    /// Parse a model-supplied label, tolerating case and whitespace.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == label)
    }
}

/// Model output for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub claim: String,
    /// Always within [0, 1].
    pub confidence: f64,
    pub category: Category,
    pub notability_reason: String,
}

/// What happened when a candidate went through the classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationOutcome {
    /// Non-empty claim with confidence at or above the threshold.
    Approved(ClassificationResult),
    /// The model answered but was not confident enough.
    BelowThreshold(ClassificationResult),
    /// The model judged the text not to be a claim.
    NotAClaim { reason: String },
    /// The call failed, timed out, or returned something unusable.
    Failed { error: String },
}

/// A candidate paired with its classification outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedCandidate {
    pub candidate: Candidate,
    pub outcome: ClassificationOutcome,
}

impl ClassifiedCandidate {
    pub fn is_approved(&self) -> bool {
        matches!(self.outcome, ClassificationOutcome::Approved(_))
    }

    /// The approved classification, if any.
    pub fn approved(&self) -> Option<&ClassificationResult> {
        match &self.outcome {
            ClassificationOutcome::Approved(result) => Some(result),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Drafts
// ---------------------------------------------------------------------------

/// Point-in-time capability metrics attached to a draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityContext {
    /// Date of the snapshot the metrics come from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<NaiveDate>,
    /// Most capable publicly available model at that date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontier_model: Option<String>,
    /// Benchmark name → score.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
}

impl CapabilityContext {
    pub fn is_empty(&self) -> bool {
        self.as_of.is_none() && self.frontier_model.is_none() && self.metrics.is_empty()
    }
}

/// How and when a draft was discovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryMeta {
    pub discovered_at: DateTime<Utc>,
    pub confidence: f64,
    pub notability_reason: String,
    pub source_type: SourceType,
}

/// The persistable unit, created once per approved non-duplicate claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObituaryDraft {
    /// Pipeline-assigned store key (`drafts.<slug>`).
    pub id: String,
    pub doc_type: String,
    pub claim: String,
    pub source_name: String,
    pub source_url: String,
    pub date: NaiveDate,
    pub categories: Vec<Category>,
    pub context: CapabilityContext,
    pub slug: String,
    pub discovery: DiscoveryMeta,
}

impl ObituaryDraft {
    /// Store key for a draft with the given slug.
    pub fn id_for_slug(slug: &str) -> String {
        format!("drafts.{slug}")
    }
}

// ---------------------------------------------------------------------------
// Run result
// ---------------------------------------------------------------------------

/// The pipeline's single return value per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRunResult {
    pub run_id: RunId,
    pub discovered: usize,
    pub filtered: usize,
    /// Approved candidates, not candidates sent to the model.
    pub classified: usize,
    pub duplicates: usize,
    pub created: usize,
    pub created_ids: Vec<String>,
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl DiscoveryRunResult {
    /// An all-zero result for a run that started at `timestamp`.
    pub fn empty(run_id: RunId, timestamp: DateTime<Utc>) -> Self {
        Self {
            run_id,
            discovered: 0,
            filtered: 0,
            classified: 0,
            duplicates: 0,
            created: 0,
            created_ids: Vec::new(),
            errors: Vec::new(),
            timestamp,
            elapsed_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_labels_parse_loosely() {
        assert_eq!(Category::from_label(" Market "), Some(Category::Market));
        assert_eq!(Category::from_label("AGI"), Some(Category::Agi));
        assert_eq!(Category::from_label("sports"), None);
    }

    #[test]
    fn empty_context_serializes_to_empty_object() {
        let json = serde_json::to_string(&CapabilityContext::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn run_result_uses_camel_case_on_the_wire() {
        let result = DiscoveryRunResult::empty(RunId::new(), Utc::now());
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("createdIds").is_some());
        assert!(json.get("elapsedMs").is_some());
        assert_eq!(json["discovered"], 0);
    }

    #[test]
    fn approved_accessor_only_for_approved() {
        let candidate = Candidate {
            url: "https://x.com/someone/status/1".into(),
            title: "post".into(),
            text: "AI is a bubble".into(),
            published_at: Utc::now(),
            author: None,
            source_type: SourceType::Social,
            score: None,
        };
        let rejected = ClassifiedCandidate {
            candidate: candidate.clone(),
            outcome: ClassificationOutcome::NotAClaim {
                reason: "question".into(),
            },
        };
        assert!(!rejected.is_approved());
        assert!(rejected.approved().is_none());

        let approved = ClassifiedCandidate {
            candidate,
            outcome: ClassificationOutcome::Approved(ClassificationResult {
                claim: "AI is a bubble".into(),
                confidence: 0.9,
                category: Category::Market,
                notability_reason: "widely shared".into(),
            }),
        };
        assert!(approved.is_approved());
        assert_eq!(approved.approved().unwrap().category, Category::Market);
    }

    #[test]
    fn draft_ids_are_namespaced() {
        assert_eq!(
            ObituaryDraft::id_for_slug("ai-is-dead-2024-01-02-abcdef"),
            "drafts.ai-is-dead-2024-01-02-abcdef"
        );
    }
}
