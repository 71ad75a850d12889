use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tracing::warn;

use parley_core::catalog::IntentCatalog;
use parley_core::domain::nlu::{IntentMatch, IntentScore};

use super::{BackendError, ClassifierBackend};
use crate::featurizer::FeatureSet;

#[derive(Clone, Debug, PartialEq)]
pub struct EnsembleOutcome {
    pub ranking: Vec<IntentScore>,
    pub top: IntentMatch,
    pub excluded: Vec<String>,
}

impl EnsembleOutcome {
    fn no_intent(excluded: Vec<String>) -> Self {
        Self { ranking: Vec::new(), top: IntentMatch::NoIntentMatched, excluded }
    }
}

pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Ordered set of classifier backends queried concurrently. Each call is
/// bounded by `backend_timeout`. Failing or expired backends are excluded
/// per call; if all fail the outcome is `NoIntentMatched` and the failure
/// counter increments.
pub struct IntentEnsemble {
    backends: Vec<ClassifierBackend>,
    confidence_threshold: f32,
    backend_timeout: Duration,
    failures: AtomicU64,
}

impl IntentEnsemble {
    pub fn new(backends: Vec<ClassifierBackend>, confidence_threshold: f32) -> Self {
        Self {
            backends,
            confidence_threshold,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            failures: AtomicU64::new(0),
        }
    }

    pub fn with_backend_timeout(mut self, backend_timeout: Duration) -> Self {
        self.backend_timeout = backend_timeout;
        self
    }

    pub fn backend_timeout(&self) -> Duration {
        self.backend_timeout
    }

    pub fn backends(&self) -> &[ClassifierBackend] {
        &self.backends
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(ClassifierBackend::name).collect()
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Calls on which every backend failed.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub async fn classify(
        &self,
        features: &FeatureSet,
        catalog: &IntentCatalog,
    ) -> EnsembleOutcome {
        if features.is_empty() || catalog.is_empty() {
            return EnsembleOutcome::no_intent(Vec::new());
        }

        let candidates = catalog.intents();
        let timeout = self.backend_timeout;
        let results = join_all(self.backends.iter().map(|backend| async move {
            tokio::time::timeout(timeout, backend.classify(features, candidates))
                .await
                .unwrap_or(Err(BackendError::Timeout(timeout)))
        }))
        .await;

        let mut rankings = Vec::new();
        let mut excluded = Vec::new();
        for (backend, result) in self.backends.iter().zip(results) {
            match result {
                Ok(ranking) => rankings.push(ranking),
                Err(error) => {
                    warn!(
                        event_name = "nlu.backend.excluded",
                        backend = backend.name(),
                        error = %error,
                        "classifier backend excluded for this call"
                    );
                    excluded.push(backend.name().to_string());
                }
            }
        }

        if rankings.is_empty() {
            let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                event_name = "nlu.ensemble.all_failed",
                backends = self.backends.len(),
                failures,
                "every classifier backend failed, no intent matched"
            );
            return EnsembleOutcome::no_intent(excluded);
        }

        let ranking = merge_rankings(&rankings, catalog);
        let top = match ranking.first() {
            Some(best) if best.confidence >= self.confidence_threshold => {
                IntentMatch::Matched(best.clone())
            }
            _ => IntentMatch::NoIntentMatched,
        };
        EnsembleOutcome { ranking, top, excluded }
    }
}

/// Maximum confidence per intent across backends, sorted descending with
/// ties broken by catalog declaration order. Intents absent from the catalog
/// and non-finite scores are discarded.
pub fn merge_rankings(rankings: &[Vec<IntentScore>], catalog: &IntentCatalog) -> Vec<IntentScore> {
    let mut best: BTreeMap<usize, f32> = BTreeMap::new();
    for score in rankings.iter().flatten() {
        if !score.confidence.is_finite() {
            continue;
        }
        let Some(index) = catalog.declaration_index(&score.intent) else {
            continue;
        };
        let confidence = score.confidence.clamp(0.0, 1.0);
        best.entry(index)
            .and_modify(|current| *current = current.max(confidence))
            .or_insert(confidence);
    }

    let mut merged = best
        .into_iter()
        .filter_map(|(index, confidence)| {
            let intent = catalog.intents().get(index)?;
            Some((index, IntentScore::new(&intent.name, confidence)))
        })
        .collect::<Vec<_>>();
    merged.sort_by(|(left_index, left), (right_index, right)| {
        right.confidence.total_cmp(&left.confidence).then_with(|| left_index.cmp(right_index))
    });
    merged.into_iter().map(|(_, score)| score).collect()
}
