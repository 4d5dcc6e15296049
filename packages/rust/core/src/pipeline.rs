//! End-to-end discovery run: search → filter → classify → approve → enrich →
//! dedup → persist.
//!
//! Stages run strictly in sequence and each one short-circuits to `Done` when
//! it yields nothing. Per-item failures are absorbed into the run result;
//! systemic failures abort the run with the failing stage attached.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use obituary_discovery::{ExaClient, SearchAdapter, SearchBackend};
use obituary_shared::{DiscoveryConfig, DiscoveryRunResult, ObituaryError, Result, RunId};
use obituary_storage::{ContentStore, LibsqlStore};

use crate::classifier::{ClassificationService, Classifier, ClassifierOptions};
use crate::context::ContextEnricher;
use crate::dedup::{DedupGate, DedupOutcome};
use crate::filter::filter_candidates;
use crate::openrouter::OpenRouterClassifier;
use crate::sink::PersistenceSink;

// ---------------------------------------------------------------------------
// Stages and progress
// ---------------------------------------------------------------------------

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Discovering,
    Filtering,
    Classifying,
    Approving,
    Enriching,
    Deduping,
    Persisting,
    Done,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovering => "discovering",
            Self::Filtering => "filtering",
            Self::Classifying => "classifying",
            Self::Approving => "approving",
            Self::Enriching => "enriching",
            Self::Deduping => "deduping",
            Self::Persisting => "persisting",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn stage(&self, stage: RunStage);
    /// Called when the run completes (not on failure).
    fn done(&self, result: &DiscoveryRunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: RunStage) {}
    fn done(&self, _result: &DiscoveryRunResult) {}
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which credentials are present. Never carries the values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPresence {
    pub search_api_key: bool,
    pub classifier_api_key: bool,
    pub store_credentials: bool,
    pub run_secret: bool,
}

impl ConfigPresence {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            search_api_key: config.search_api_key.is_some(),
            classifier_api_key: config.classifier_api_key.is_some(),
            store_credentials: config.store.is_remote(),
            run_secret: config.run_secret.is_some(),
        }
    }
}

/// Run-level knobs.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub since_window_hours: u32,
    pub run_timeout: Duration,
    /// Stop before persisting.
    pub dry_run: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            since_window_hours: 24,
            run_timeout: Duration::from_secs(280),
            dry_run: false,
        }
    }
}

/// The collaborators a run needs.
pub struct PipelineDeps {
    pub search: SearchAdapter,
    pub classifier: Classifier,
    pub enricher: ContextEnricher,
    pub store: Arc<dyn ContentStore>,
}

/// How a triggered run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(DiscoveryRunResult),
    /// The presented secret did not match; nothing ran.
    Unauthorized,
    Failed(ObituaryError),
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct DiscoveryPipeline {
    search: SearchAdapter,
    classifier: Classifier,
    enricher: ContextEnricher,
    dedup: DedupGate,
    sink: PersistenceSink,
    options: PipelineOptions,
    run_secret: Option<String>,
}

impl DiscoveryPipeline {
    /// Build production collaborators from a resolved config.
    ///
    /// Missing search or classifier keys are not errors: those stages
    /// degrade at run time. The store must be reachable to open.
    pub async fn from_config(config: &DiscoveryConfig) -> Result<Self> {
        let backend: Option<Arc<dyn SearchBackend>> = match &config.search_api_key {
            Some(key) => Some(Arc::new(ExaClient::new(key, &config.search_base_url)?)),
            None => {
                warn!("search API key not set, discovery will find nothing");
                None
            }
        };
        let service: Option<Arc<dyn ClassificationService>> = match &config.classifier_api_key {
            Some(key) => Some(Arc::new(OpenRouterClassifier::new(
                key,
                &config.classifier_model,
                &config.classifier_base_url,
            )?)),
            None => {
                warn!("classifier API key not set, candidates will not be classified");
                None
            }
        };
        let enricher = match &config.metrics_path {
            Some(path) => ContextEnricher::from_file(Path::new(path))?,
            None => ContextEnricher::builtin(),
        };
        let store: Arc<dyn ContentStore> = Arc::new(LibsqlStore::connect(&config.store).await?);

        let deps = PipelineDeps {
            search: SearchAdapter::new(backend, config.max_results_per_search),
            classifier: Classifier::new(
                service,
                ClassifierOptions {
                    threshold: config.acceptance_threshold,
                    concurrency: config.classify_concurrency as usize,
                    timeout: Duration::from_secs(config.classify_timeout_secs),
                    ..Default::default()
                },
            ),
            enricher,
            store,
        };
        let options = PipelineOptions {
            since_window_hours: config.since_window_hours,
            run_timeout: Duration::from_secs(config.run_timeout_secs),
            dry_run: false,
        };
        Ok(Self::with_deps(deps, options, config.run_secret.clone()))
    }

    pub fn with_deps(deps: PipelineDeps, options: PipelineOptions, run_secret: Option<String>) -> Self {
        Self {
            search: deps.search,
            classifier: deps.classifier,
            enricher: deps.enricher,
            dedup: DedupGate::new(Arc::clone(&deps.store)),
            sink: PersistenceSink::new(deps.store),
            options,
            run_secret,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.options.dry_run = dry_run;
        self
    }

    /// Whether runs need a matching secret.
    pub fn requires_auth(&self) -> bool {
        self.run_secret.is_some()
    }

    /// Check a presented secret. Always passes when no secret is configured.
    pub fn authorize(&self, presented: Option<&str>) -> bool {
        match &self.run_secret {
            None => true,
            Some(secret) => {
                presented.is_some_and(|p| constant_time_eq(p.as_bytes(), secret.as_bytes()))
            }
        }
    }

    /// Authorize, then run. Unauthorized callers cause no stage to run.
    pub async fn trigger(
        &self,
        presented: Option<&str>,
        progress: &dyn ProgressReporter,
    ) -> RunOutcome {
        if !self.authorize(presented) {
            warn!("discovery run rejected: bad or missing run secret");
            return RunOutcome::Unauthorized;
        }
        match self.run(progress).await {
            Ok(result) => RunOutcome::Completed(result),
            Err(e) => RunOutcome::Failed(e),
        }
    }

    /// Run every stage once, bounded by the run timeout.
    #[instrument(skip_all, fields(dry_run = self.options.dry_run))]
    pub async fn run(&self, progress: &dyn ProgressReporter) -> Result<DiscoveryRunResult> {
        let started = Instant::now();
        let run_id = RunId::new();
        let timestamp = Utc::now();
        let current = Mutex::new(RunStage::Discovering);

        info!(%run_id, "starting discovery run");

        let stages = self.run_stages(run_id.clone(), timestamp, started, &current, progress);
        let outcome = tokio::time::timeout(self.options.run_timeout, stages).await;
        let stage = *current.lock().unwrap_or_else(|e| e.into_inner());

        match outcome {
            Ok(Ok(mut result)) => {
                result.elapsed_ms = started.elapsed().as_millis() as u64;
                info!(
                    %run_id,
                    discovered = result.discovered,
                    filtered = result.filtered,
                    classified = result.classified,
                    duplicates = result.duplicates,
                    created = result.created,
                    errors = result.errors.len(),
                    elapsed_ms = result.elapsed_ms,
                    "discovery run complete"
                );
                progress.done(&result);
                Ok(result)
            }
            Ok(Err(e)) => {
                error!(%run_id, stage = %stage, error = %e, "discovery run failed");
                Err(e)
            }
            Err(_) => {
                let e = ObituaryError::Timeout {
                    what: "discovery run".into(),
                    secs: self.options.run_timeout.as_secs(),
                }
                .in_stage(stage.as_str(), started.elapsed());
                error!(%run_id, stage = %stage, error = %e, "discovery run timed out");
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        run_id: RunId,
        timestamp: DateTime<Utc>,
        started: Instant,
        current: &Mutex<RunStage>,
        progress: &dyn ProgressReporter,
    ) -> Result<DiscoveryRunResult> {
        let enter = |stage: RunStage| {
            *current.lock().unwrap_or_else(|e| e.into_inner()) = stage;
            progress.stage(stage);
        };
        let mut result = DiscoveryRunResult::empty(run_id, timestamp);

        // --- Discovering ---
        enter(RunStage::Discovering);
        let since = timestamp - chrono::Duration::hours(i64::from(self.options.since_window_hours));
        let discovered = self.search.search_candidates(since).await;
        result.discovered = discovered.len();
        if discovered.is_empty() {
            enter(RunStage::Done);
            return Ok(result);
        }

        // --- Filtering ---
        enter(RunStage::Filtering);
        let filtered = filter_candidates(&discovered);
        result.filtered = filtered.len();
        if filtered.is_empty() {
            enter(RunStage::Done);
            return Ok(result);
        }

        // --- Classifying ---
        enter(RunStage::Classifying);
        if !self.classifier.is_configured() {
            result.errors.push(format!(
                "classifier not configured; {} candidates were not classified",
                filtered.len()
            ));
            enter(RunStage::Done);
            return Ok(result);
        }
        let classified = self.classifier.classify_all(filtered).await;

        // --- Approving ---
        enter(RunStage::Approving);
        let approved = self.classifier.filter_classified(classified);
        result.classified = approved.len();
        if approved.is_empty() {
            enter(RunStage::Done);
            return Ok(result);
        }

        // --- Enriching ---
        enter(RunStage::Enriching);
        let drafts: Vec<_> = approved
            .iter()
            .filter_map(|c| self.enricher.build_draft(c, timestamp))
            .collect();

        // --- Deduping ---
        enter(RunStage::Deduping);
        let DedupOutcome { new, duplicates } = self
            .dedup
            .partition(drafts)
            .await
            .map_err(|e| e.in_stage(RunStage::Deduping.as_str(), started.elapsed()))?;
        result.duplicates = duplicates.len();
        if new.is_empty() {
            result.errors.push(format!(
                "all {} approved candidates were already in the store",
                duplicates.len()
            ));
            enter(RunStage::Done);
            return Ok(result);
        }

        if self.options.dry_run {
            info!(would_create = new.len(), "dry run, skipping persistence");
            enter(RunStage::Done);
            return Ok(result);
        }

        // --- Persisting ---
        enter(RunStage::Persisting);
        let outcome = self
            .sink
            .persist(&new)
            .await
            .map_err(|e| e.in_stage(RunStage::Persisting.as_str(), started.elapsed()))?;
        result.created = outcome.created_ids.len();
        result.created_ids = outcome.created_ids;
        for (index, message) in outcome.failed {
            let slug = new.get(index).map(|d| d.slug.as_str()).unwrap_or("?");
            result
                .errors
                .push(format!("failed to create draft {slug}: {message}"));
        }

        enter(RunStage::Done);
        Ok(result)
    }
}

/// Compare two byte strings in time independent of where they differ.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slug::slug_for;
    use crate::testing::{EchoClassifier, FixedSearch, MemoryStore, draft, social_hit};
    use async_trait::async_trait;
    use obituary_discovery::{ProviderResult, SearchRequest};

    fn pipeline(
        search: Arc<FixedSearch>,
        classifier: Option<Arc<EchoClassifier>>,
        store: Arc<MemoryStore>,
        secret: Option<&str>,
    ) -> DiscoveryPipeline {
        let service = classifier.map(|c| c as Arc<dyn ClassificationService>);
        DiscoveryPipeline::with_deps(
            PipelineDeps {
                search: SearchAdapter::new(Some(search), 50),
                classifier: Classifier::new(service, ClassifierOptions::default()),
                enricher: ContextEnricher::builtin(),
                store,
            },
            PipelineOptions::default(),
            secret.map(str::to_string),
        )
    }

    /// Ten hits: three with empty text, seven with distinct claims.
    fn ten_hits() -> Vec<ProviderResult> {
        (0..10)
            .map(|i| {
                if i % 3 == 0 && i < 9 {
                    social_hit(i, "")
                } else {
                    social_hit(i, &format!("claim number {i}"))
                }
            })
            .collect()
    }

    fn published_day() -> chrono::NaiveDate {
        "2025-03-02".parse().unwrap()
    }

    #[tokio::test]
    async fn zero_candidates_short_circuits() {
        let search = Arc::new(FixedSearch::default());
        let classifier = Arc::new(EchoClassifier::default());
        let store = Arc::new(MemoryStore::default());
        let p = pipeline(search, Some(classifier.clone()), store.clone(), None);

        let result = p.run(&SilentProgress).await.unwrap();
        assert_eq!(result.discovered, 0);
        assert_eq!(result.filtered, 0);
        assert_eq!(result.classified, 0);
        assert_eq!(result.created, 0);
        assert!(result.created_ids.is_empty());
        assert!(result.errors.is_empty());
        assert_eq!(classifier.calls(), 0);
        assert_eq!(store.key_queries(), 0);
    }

    #[tokio::test]
    async fn counts_flow_through_every_stage() {
        let search = Arc::new(FixedSearch::social(ten_hits()));
        let classifier = Arc::new(EchoClassifier::with_low(&["claim number 1", "claim number 2"]));
        let store = Arc::new(MemoryStore::default());
        store.insert(draft(
            &slug_for("claim number 4", published_day()),
            "https://example.com/elsewhere",
        ));
        let p = pipeline(search, Some(classifier.clone()), store.clone(), None);

        let result = p.run(&SilentProgress).await.unwrap();
        assert_eq!(result.discovered, 10);
        assert_eq!(result.filtered, 7);
        assert_eq!(classifier.calls(), 7);
        assert_eq!(result.classified, 5);
        assert_eq!(result.duplicates, 1);
        assert_eq!(result.created, 4);
        assert_eq!(result.created_ids.len(), 4);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(store.len(), 5);
        assert!(result.created_ids.iter().all(|id| id.starts_with("drafts.")));
    }

    #[tokio::test]
    async fn one_failed_write_is_partial_success() {
        let hits = (0..4).map(|i| social_hit(i, &format!("claim {i}"))).collect();
        let search = Arc::new(FixedSearch::social(hits));
        let failing = slug_for("claim 2", published_day());
        let store = Arc::new(MemoryStore::default().failing_slugs(&[failing.as_str()]));
        let p = pipeline(search, Some(Arc::new(EchoClassifier::default())), store, None);

        let result = match p.trigger(None, &SilentProgress).await {
            RunOutcome::Completed(result) => result,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(result.created, 3);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains(&failing));
        assert!(result.errors[0].starts_with("failed to create draft"));
    }

    #[tokio::test]
    async fn unauthorized_runs_nothing() {
        let search = Arc::new(FixedSearch::social(ten_hits()));
        let store = Arc::new(MemoryStore::default());
        let p = pipeline(
            search.clone(),
            Some(Arc::new(EchoClassifier::default())),
            store.clone(),
            Some("s3cret"),
        );
        assert!(p.requires_auth());

        for presented in [None, Some("wrong"), Some("s3cret!"), Some("")] {
            let outcome = p.trigger(presented, &SilentProgress).await;
            assert!(matches!(outcome, RunOutcome::Unauthorized));
        }
        assert_eq!(search.calls(), 0);
        assert_eq!(store.writes(), 0);
        assert_eq!(store.key_queries(), 0);

        let outcome = p.trigger(Some("s3cret"), &SilentProgress).await;
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(search.calls(), 2);
    }

    #[tokio::test]
    async fn missing_classifier_is_reported_not_fatal() {
        let search = Arc::new(FixedSearch::social(ten_hits()));
        let store = Arc::new(MemoryStore::default());
        let p = pipeline(search, None, store.clone(), None);

        let result = p.run(&SilentProgress).await.unwrap();
        assert_eq!(result.filtered, 7);
        assert_eq!(result.classified, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("classifier not configured"));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn all_duplicates_explained() {
        let search = Arc::new(FixedSearch::social(vec![social_hit(1, "AI is a bubble")]));
        let store = Arc::new(MemoryStore::default());
        store.insert(draft("unrelated", "https://twitter.com/user1/status/1"));
        let p = pipeline(search, Some(Arc::new(EchoClassifier::default())), store.clone(), None);

        let result = p.run(&SilentProgress).await.unwrap();
        assert_eq!(result.duplicates, 1);
        assert_eq!(result.created, 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn unreachable_store_fails_the_run_with_stage() {
        let search = Arc::new(FixedSearch::social(ten_hits()));
        let store = Arc::new(MemoryStore::unreachable());
        let p = pipeline(search, Some(Arc::new(EchoClassifier::default())), store, None);

        match p.trigger(None, &SilentProgress).await {
            RunOutcome::Failed(ObituaryError::Stage { stage, .. }) => assert_eq!(stage, "deduping"),
            other => panic!("expected stage failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let search = Arc::new(FixedSearch::social(ten_hits()));
        let store = Arc::new(MemoryStore::default());
        let p = pipeline(search, Some(Arc::new(EchoClassifier::default())), store.clone(), None)
            .with_dry_run(true);

        let result = p.run(&SilentProgress).await.unwrap();
        assert_eq!(result.classified, 7);
        assert_eq!(result.created, 0);
        assert_eq!(store.writes(), 0);
    }

    struct StalledSearch;

    #[async_trait]
    impl SearchBackend for StalledSearch {
        async fn search(&self, _request: &SearchRequest) -> Result<Vec<ProviderResult>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn run_timeout_fails_in_current_stage() {
        let p = DiscoveryPipeline::with_deps(
            PipelineDeps {
                search: SearchAdapter::new(Some(Arc::new(StalledSearch)), 50),
                classifier: Classifier::new(None, ClassifierOptions::default()),
                enricher: ContextEnricher::builtin(),
                store: Arc::new(MemoryStore::default()),
            },
            PipelineOptions {
                run_timeout: Duration::from_millis(50),
                ..Default::default()
            },
            None,
        );

        let err = p.run(&SilentProgress).await.unwrap_err();
        match err {
            ObituaryError::Stage { stage, source, .. } => {
                assert_eq!(stage, "discovering");
                assert!(matches!(*source, ObituaryError::Timeout { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        stages: Mutex<Vec<RunStage>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn stage(&self, stage: RunStage) {
            self.stages.lock().unwrap().push(stage);
        }
        fn done(&self, _result: &DiscoveryRunResult) {}
    }

    #[tokio::test]
    async fn stages_are_reported_in_order() {
        let search = Arc::new(FixedSearch::social(vec![social_hit(1, "AI is a fad")]));
        let p = pipeline(
            search,
            Some(Arc::new(EchoClassifier::default())),
            Arc::new(MemoryStore::default()),
            None,
        );
        let progress = RecordingProgress::default();
        p.run(&progress).await.unwrap();
        assert_eq!(
            *progress.stages.lock().unwrap(),
            vec![
                RunStage::Discovering,
                RunStage::Filtering,
                RunStage::Classifying,
                RunStage::Approving,
                RunStage::Enriching,
                RunStage::Deduping,
                RunStage::Persisting,
                RunStage::Done,
            ]
        );
    }

    #[test]
    fn constant_time_comparison() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn presence_flags_serialize_camel_case() {
        let presence = ConfigPresence {
            search_api_key: true,
            classifier_api_key: false,
            store_credentials: true,
            run_secret: false,
        };
        let json = serde_json::to_value(presence).unwrap();
        assert_eq!(json["searchApiKey"], true);
        assert_eq!(json["classifierApiKey"], false);
        assert_eq!(json["storeCredentials"], true);
        assert_eq!(json["runSecret"], false);
    }
}
