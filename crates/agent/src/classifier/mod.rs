use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use parley_core::domain::intent::IntentDefinition;
use parley_core::domain::nlu::IntentScore;

use crate::featurizer::FeatureSet;

pub mod ensemble;
pub mod statistical;
pub mod zero_shot;

pub use ensemble::{merge_rankings, EnsembleOutcome, IntentEnsemble, DEFAULT_BACKEND_TIMEOUT};
pub use statistical::{
    IntentCentroid, ModelOrigin, StatisticalClassifier, StatisticalModel, StatisticalModelError,
};
pub use zero_shot::ZeroShotClassifier;

/// Per-call backend failure. The ensemble excludes the backend for that call
/// and never lets this escape.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),
}

/// Capability for backends registered from outside this crate.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// Scores `candidates`, highest first. Intents outside `candidates` are
    /// ignored by the ensemble.
    async fn classify(
        &self,
        features: &FeatureSet,
        candidates: &[IntentDefinition],
    ) -> Result<Vec<IntentScore>, BackendError>;
}

pub enum ClassifierBackend {
    Statistical(StatisticalClassifier),
    ZeroShot(ZeroShotClassifier),
    External(Arc<dyn IntentClassifier>),
}

impl ClassifierBackend {
    pub fn name(&self) -> &str {
        match self {
            Self::Statistical(_) => "statistical",
            Self::ZeroShot(_) => "zero_shot",
            Self::External(classifier) => classifier.name(),
        }
    }

    pub async fn classify(
        &self,
        features: &FeatureSet,
        candidates: &[IntentDefinition],
    ) -> Result<Vec<IntentScore>, BackendError> {
        match self {
            Self::Statistical(classifier) => classifier.classify(features, candidates),
            Self::ZeroShot(classifier) => classifier.classify(features, candidates).await,
            Self::External(classifier) => classifier.classify(features, candidates).await,
        }
    }
}
