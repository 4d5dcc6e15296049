//! Claim classifier: asks a model whether each candidate asserts an
//! AI-skeptical claim, then keeps only confident, non-empty claims.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use obituary_shared::{
    Candidate, ClassificationOutcome, ClassificationResult, ClassifiedCandidate, ObituaryError,
    Result,
};

/// Default acceptance threshold for approval.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// Default number of model calls in flight.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default per-call deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest we wait on a rate-limit before the single retry.
pub const DEFAULT_MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(10);

/// What the model said about one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelVerdict {
    Claim(ClassificationResult),
    NotAClaim { reason: String },
}

/// A model (or anything else) that can judge a candidate.
#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn classify(&self, candidate: &Candidate) -> Result<ModelVerdict>;
}

/// Tuning knobs for [`Classifier`].
#[derive(Debug, Clone)]
pub struct ClassifierOptions {
    pub threshold: f64,
    pub concurrency: usize,
    pub timeout: Duration,
    pub max_rate_limit_wait: Duration,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            max_rate_limit_wait: DEFAULT_MAX_RATE_LIMIT_WAIT,
        }
    }
}

/// Bounded-concurrency batch classifier.
#[derive(Clone)]
pub struct Classifier {
    service: Option<Arc<dyn ClassificationService>>,
    options: ClassifierOptions,
}

impl Classifier {
    /// `service` is `None` when no classifier credentials are configured.
    pub fn new(service: Option<Arc<dyn ClassificationService>>, options: ClassifierOptions) -> Self {
        Self { service, options }
    }

    pub fn is_configured(&self) -> bool {
        self.service.is_some()
    }

    /// Classify every candidate, one attempt each. Output order matches input.
    ///
    /// Returns an empty list when no service is configured.
    #[instrument(skip_all, fields(count = candidates.len(), concurrency = self.options.concurrency))]
    pub async fn classify_all(&self, candidates: Vec<Candidate>) -> Vec<ClassifiedCandidate> {
        let Some(service) = &self.service else {
            warn!(
                count = candidates.len(),
                "classifier not configured, skipping classification"
            );
            return Vec::new();
        };

        let service = service.as_ref();
        let concurrency = self.options.concurrency.max(1);
        let classified: Vec<ClassifiedCandidate> = stream::iter(candidates)
            .map(|candidate| async move {
                let outcome = self.classify_one(service, &candidate).await;
                ClassifiedCandidate { candidate, outcome }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let approved = classified.iter().filter(|c| c.is_approved()).count();
        info!(total = classified.len(), approved, "classification complete");
        classified
    }

    /// Keep only approved candidates, preserving relative order.
    ///
    /// The threshold and non-empty claim are re-checked here so results built
    /// elsewhere cannot slip through.
    pub fn filter_classified(&self, classified: Vec<ClassifiedCandidate>) -> Vec<ClassifiedCandidate> {
        classified
            .into_iter()
            .filter(|c| {
                c.approved()
                    .is_some_and(|r| is_approvable(r, self.options.threshold))
            })
            .collect()
    }

    async fn classify_one(
        &self,
        service: &dyn ClassificationService,
        candidate: &Candidate,
    ) -> ClassificationOutcome {
        let verdict = match self.attempt(service, candidate).await {
            Err(ObituaryError::RateLimited { retry_after_secs }) => {
                let wait = retry_after_secs
                    .map(Duration::from_secs)
                    .unwrap_or(Duration::from_secs(1))
                    .min(self.options.max_rate_limit_wait);
                debug!(url = %candidate.url, wait_ms = wait.as_millis() as u64, "rate limited, retrying once");
                tokio::time::sleep(wait).await;
                self.attempt(service, candidate).await
            }
            other => other,
        };

        match verdict {
            Ok(verdict) => judge(verdict, self.options.threshold),
            Err(e) => {
                warn!(url = %candidate.url, error = %e, "classification failed");
                ClassificationOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn attempt(
        &self,
        service: &dyn ClassificationService,
        candidate: &Candidate,
    ) -> Result<ModelVerdict> {
        match tokio::time::timeout(self.options.timeout, service.classify(candidate)).await {
            Ok(result) => result,
            Err(_) => Err(ObituaryError::Timeout {
                what: format!("classifying {}", candidate.url),
                secs: self.options.timeout.as_secs(),
            }),
        }
    }
}

/// Turn a model verdict into an outcome against `threshold`.
pub fn judge(verdict: ModelVerdict, threshold: f64) -> ClassificationOutcome {
    match verdict {
        ModelVerdict::NotAClaim { reason } => ClassificationOutcome::NotAClaim { reason },
        ModelVerdict::Claim(mut result) => {
            result.claim = result.claim.trim().to_string();
            result.confidence = clamp_confidence(result.confidence);
            if result.claim.is_empty() {
                return ClassificationOutcome::NotAClaim {
                    reason: "empty claim".into(),
                };
            }
            if is_approvable(&result, threshold) {
                ClassificationOutcome::Approved(result)
            } else {
                ClassificationOutcome::BelowThreshold(result)
            }
        }
    }
}

fn is_approvable(result: &ClassificationResult, threshold: f64) -> bool {
    !result.claim.trim().is_empty() && result.confidence >= threshold
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use obituary_shared::{Category, SourceType};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn candidate(i: usize) -> Candidate {
        Candidate {
            url: format!("https://x.com/u{i}/status/{i}"),
            title: format!("post {i}"),
            text: format!("claim number {i}"),
            published_at: Utc::now(),
            author: None,
            source_type: SourceType::Social,
            score: None,
        }
    }

    fn claim(text: &str, confidence: f64) -> ModelVerdict {
        ModelVerdict::Claim(ClassificationResult {
            claim: text.into(),
            confidence,
            category: Category::Capability,
            notability_reason: "prominent author".into(),
        })
    }

    /// Confidence derived from the candidate index: index * 0.1.
    struct IndexedService {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClassificationService for IndexedService {
        async fn classify(&self, candidate: &Candidate) -> Result<ModelVerdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let i: usize = candidate.url.rsplit('/').next().unwrap().parse().unwrap();
            // Later candidates finish first to exercise ordering.
            tokio::time::sleep(Duration::from_millis((10 - i as u64 % 10) * 2)).await;
            match i {
                3 => Err(ObituaryError::Classification("HTTP 500".into())),
                5 => Ok(ModelVerdict::NotAClaim {
                    reason: "a question".into(),
                }),
                _ => Ok(claim(&candidate.text, i as f64 * 0.1)),
            }
        }
    }

    #[tokio::test]
    async fn preserves_order_and_isolates_failures() {
        let service = Arc::new(IndexedService {
            calls: AtomicUsize::new(0),
        });
        let classifier = Classifier::new(Some(service.clone()), ClassifierOptions::default());

        let results = classifier.classify_all((0..10).map(candidate).collect()).await;
        assert_eq!(results.len(), 10);
        assert_eq!(service.calls.load(Ordering::SeqCst), 10);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.candidate.url, candidate(i).url);
        }
        assert!(matches!(results[3].outcome, ClassificationOutcome::Failed { .. }));
        assert!(matches!(results[5].outcome, ClassificationOutcome::NotAClaim { .. }));
        assert!(matches!(results[2].outcome, ClassificationOutcome::BelowThreshold(_)));

        let approved = classifier.filter_classified(results);
        let urls: Vec<_> = approved.iter().map(|c| c.candidate.url.clone()).collect();
        assert_eq!(
            urls,
            vec![
                "https://x.com/u7/status/7",
                "https://x.com/u8/status/8",
                "https://x.com/u9/status/9",
            ]
        );
    }

    /// Records the peak number of calls running at once.
    struct PeakTracker {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ClassificationService for PeakTracker {
        async fn classify(&self, candidate: &Candidate) -> Result<ModelVerdict> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(15)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(claim(&candidate.text, 0.9))
        }
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_limit() {
        let service = Arc::new(PeakTracker {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let options = ClassifierOptions {
            concurrency: 2,
            ..Default::default()
        };
        let classifier = Classifier::new(Some(service.clone()), options);

        let results = classifier.classify_all((0..10).map(candidate).collect()).await;
        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.is_approved()));
        let peak = service.peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak in-flight calls was {peak}");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn unconfigured_returns_empty() {
        let classifier = Classifier::new(None, ClassifierOptions::default());
        assert!(!classifier.is_configured());
        assert!(classifier.classify_all(vec![candidate(1)]).await.is_empty());
    }

    struct SlowService;

    #[async_trait]
    impl ClassificationService for SlowService {
        async fn classify(&self, _candidate: &Candidate) -> Result<ModelVerdict> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(claim("too late", 0.99))
        }
    }

    #[tokio::test]
    async fn timeouts_become_failures() {
        let options = ClassifierOptions {
            timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let classifier = Classifier::new(Some(Arc::new(SlowService)), options);
        let results = classifier.classify_all(vec![candidate(1)]).await;
        match &results[0].outcome {
            ClassificationOutcome::Failed { error } => assert!(error.contains("timed out")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    /// Rate-limits the first `limit` calls, then answers.
    struct RateLimitedService {
        limit: usize,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl ClassificationService for RateLimitedService {
        async fn classify(&self, _candidate: &Candidate) -> Result<ModelVerdict> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls <= self.limit {
                return Err(ObituaryError::RateLimited {
                    retry_after_secs: Some(0),
                });
            }
            Ok(claim("AI has plateaued", 0.9))
        }
    }

    #[tokio::test]
    async fn rate_limit_gets_exactly_one_retry() {
        let once = Arc::new(RateLimitedService {
            limit: 1,
            calls: Mutex::new(0),
        });
        let classifier = Classifier::new(Some(once.clone()), ClassifierOptions::default());
        let results = classifier.classify_all(vec![candidate(1)]).await;
        assert!(results[0].is_approved());
        assert_eq!(*once.calls.lock().unwrap(), 2);

        let twice = Arc::new(RateLimitedService {
            limit: 2,
            calls: Mutex::new(0),
        });
        let classifier = Classifier::new(Some(twice.clone()), ClassifierOptions::default());
        let results = classifier.classify_all(vec![candidate(1)]).await;
        assert!(matches!(results[0].outcome, ClassificationOutcome::Failed { .. }));
        assert_eq!(*twice.calls.lock().unwrap(), 2);
    }

    #[test]
    fn judge_clamps_and_rejects_empty_claims() {
        match judge(claim("AI is dead", 1.7), 0.7) {
            ClassificationOutcome::Approved(r) => assert_eq!(r.confidence, 1.0),
            other => panic!("unexpected {other:?}"),
        }
        match judge(claim("AI is dead", f64::NAN), 0.7) {
            ClassificationOutcome::BelowThreshold(r) => assert_eq!(r.confidence, 0.0),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            judge(claim("   ", 0.95), 0.7),
            ClassificationOutcome::NotAClaim { .. }
        ));
        assert!(matches!(
            judge(claim("exactly at threshold", 0.7), 0.7),
            ClassificationOutcome::Approved(_)
        ));
    }

    #[test]
    fn filter_classified_rechecks_threshold() {
        let strict = Classifier::new(
            None,
            ClassifierOptions {
                threshold: 0.9,
                ..Default::default()
            },
        );
        let make = |confidence: f64| ClassifiedCandidate {
            candidate: candidate(1),
            outcome: ClassificationOutcome::Approved(ClassificationResult {
                claim: "AI is a fad".into(),
                confidence,
                category: Category::Dismissive,
                notability_reason: String::new(),
            }),
        };
        let kept = strict.filter_classified(vec![make(0.8), make(0.95), make(0.9)]);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|c| c.approved().unwrap().confidence >= 0.9));
    }
}
