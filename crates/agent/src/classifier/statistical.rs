use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use parley_core::catalog::IntentCatalog;
use parley_core::domain::intent::IntentDefinition;
use parley_core::domain::nlu::IntentScore;

use super::BackendError;
use crate::featurizer::{cosine_similarity, FeatureSet, Featurizer};

pub const MODEL_FORMAT_VERSION: u32 = 1;
const DEFAULT_SCALE: f32 = 10.0;

#[derive(Debug, Error)]
pub enum StatisticalModelError {
    #[error("failed to read statistical model `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse statistical model `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported statistical model format version {0}")]
    UnsupportedVersion(u32),
    #[error("model embedding dimension {model} does not match featurizer dimension {featurizer}")]
    DimensionMismatch { model: usize, featurizer: usize },
    #[error("statistical model has no intent centroids")]
    Empty,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentCentroid {
    pub intent: String,
    pub vector: Vec<f32>,
}

/// Nearest-centroid intent model over featurizer embeddings. Similarities
/// are turned into probabilities with a softmax sharpened by `scale`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatisticalModel {
    pub format_version: u32,
    pub embedding_dim: usize,
    #[serde(default = "default_scale")]
    pub scale: f32,
    pub centroids: Vec<IntentCentroid>,
}

impl StatisticalModel {
    /// Loads an artifact trained offline.
    pub fn load(path: &Path) -> Result<Self, StatisticalModelError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| StatisticalModelError::Read { path: path.to_path_buf(), source })?;
        let model: Self = serde_json::from_str(&raw)
            .map_err(|source| StatisticalModelError::Parse { path: path.to_path_buf(), source })?;
        model.validate()?;
        Ok(model)
    }

    /// Prototype model from the catalog's training examples: one normalized
    /// mean embedding per intent. Intents without examples get no centroid.
    pub fn from_examples(featurizer: &Featurizer, catalog: &IntentCatalog) -> Self {
        let dim = featurizer.embedding_dim();
        let mut centroids = Vec::new();

        for intent in catalog.intents() {
            let mut sum = vec![0.0_f32; dim];
            let mut count = 0_usize;
            for example in &intent.examples {
                let features = featurizer.featurize(example);
                if features.is_empty() {
                    continue;
                }
                sum.iter_mut().zip(&features.embedding).for_each(|(total, value)| *total += value);
                count += 1;
            }
            if count == 0 {
                continue;
            }

            let norm = sum.iter().map(|value| value * value).sum::<f32>().sqrt();
            if norm > 0.0 {
                sum.iter_mut().for_each(|value| *value /= norm);
            }
            centroids.push(IntentCentroid { intent: intent.name.clone(), vector: sum });
        }

        Self {
            format_version: MODEL_FORMAT_VERSION,
            embedding_dim: dim,
            scale: DEFAULT_SCALE,
            centroids,
        }
    }

    pub fn validate(&self) -> Result<(), StatisticalModelError> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(StatisticalModelError::UnsupportedVersion(self.format_version));
        }
        if self.centroids.is_empty() {
            return Err(StatisticalModelError::Empty);
        }
        if let Some(centroid) =
            self.centroids.iter().find(|centroid| centroid.vector.len() != self.embedding_dim)
        {
            return Err(StatisticalModelError::DimensionMismatch {
                model: self.embedding_dim,
                featurizer: centroid.vector.len(),
            });
        }
        Ok(())
    }

    pub fn intents(&self) -> impl Iterator<Item = &str> {
        self.centroids.iter().map(|centroid| centroid.intent.as_str())
    }

    /// Probability per candidate intent the model knows, highest first; ties
    /// follow candidate order.
    pub fn predict(&self, embedding: &[f32], candidates: &[IntentDefinition]) -> Vec<IntentScore> {
        let logits = candidates
            .iter()
            .filter_map(|intent| {
                self.centroids
                    .iter()
                    .find(|centroid| centroid.intent == intent.name)
                    .map(|centroid| {
                        (intent.name.as_str(), cosine_similarity(embedding, &centroid.vector))
                    })
            })
            .map(|(intent, similarity)| (intent, similarity * self.scale))
            .collect::<Vec<_>>();
        if logits.is_empty() {
            return Vec::new();
        }

        let max = logits.iter().map(|(_, logit)| *logit).fold(f32::NEG_INFINITY, f32::max);
        let exponentials =
            logits.iter().map(|(intent, logit)| (*intent, (logit - max).exp())).collect::<Vec<_>>();
        let total = exponentials.iter().map(|(_, value)| value).sum::<f32>();

        let mut scores = exponentials
            .into_iter()
            .map(|(intent, value)| IntentScore::new(intent, value / total))
            .collect::<Vec<_>>();
        scores.sort_by(|left, right| right.confidence.total_cmp(&left.confidence));
        scores
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelOrigin {
    Artifact(PathBuf),
    Examples,
}

struct Fitted {
    generation: u64,
    model: Arc<StatisticalModel>,
}

/// Statistical backend. Models built from examples are refit whenever a
/// newer catalog generation is prepared; artifacts stay fixed.
pub struct StatisticalClassifier {
    fitted: RwLock<Fitted>,
    origin: ModelOrigin,
    ranking_length: usize,
}

impl StatisticalClassifier {
    pub fn new(
        model: StatisticalModel,
        origin: ModelOrigin,
        featurizer: &Featurizer,
        ranking_length: usize,
    ) -> Result<Self, StatisticalModelError> {
        if model.embedding_dim != featurizer.embedding_dim() {
            return Err(StatisticalModelError::DimensionMismatch {
                model: model.embedding_dim,
                featurizer: featurizer.embedding_dim(),
            });
        }
        Ok(Self {
            fitted: RwLock::new(Fitted { generation: 0, model: Arc::new(model) }),
            origin,
            ranking_length: ranking_length.max(1),
        })
    }

    /// Loads the artifact at `path`, or fits prototypes from the catalog
    /// examples when no artifact is configured.
    pub fn from_config(
        path: Option<&Path>,
        featurizer: &Featurizer,
        catalog: &IntentCatalog,
        ranking_length: usize,
    ) -> Result<Self, StatisticalModelError> {
        match path {
            Some(path) => {
                let model = StatisticalModel::load(path)?;
                info!(
                    event_name = "nlu.statistical.loaded",
                    path = %path.display(),
                    intents = model.centroids.len(),
                    "statistical model artifact loaded"
                );
                let origin = ModelOrigin::Artifact(path.to_path_buf());
                Self::new(model, origin, featurizer, ranking_length)
            }
            None => {
                let model = StatisticalModel::from_examples(featurizer, catalog);
                let classifier =
                    Self::new(model, ModelOrigin::Examples, featurizer, ranking_length)?;
                classifier.write_fitted().generation = catalog.generation();
                Ok(classifier)
            }
        }
    }

    pub fn origin(&self) -> &ModelOrigin {
        &self.origin
    }

    pub fn model(&self) -> Arc<StatisticalModel> {
        match self.fitted.read() {
            Ok(fitted) => Arc::clone(&fitted.model),
            Err(poisoned) => Arc::clone(&poisoned.into_inner().model),
        }
    }

    /// Catalog generation the example prototypes were fitted on.
    pub fn fitted_generation(&self) -> u64 {
        match self.fitted.read() {
            Ok(fitted) => fitted.generation,
            Err(poisoned) => poisoned.into_inner().generation,
        }
    }

    fn write_fitted(&self) -> std::sync::RwLockWriteGuard<'_, Fitted> {
        match self.fitted.write() {
            Ok(fitted) => fitted,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Rebuilds example-based prototypes for a newer catalog snapshot.
    pub fn prepare(&self, featurizer: &Featurizer, catalog: &IntentCatalog) {
        if self.origin != ModelOrigin::Examples {
            return;
        }
        if catalog.generation() <= self.fitted_generation() {
            return;
        }
        let refit = Arc::new(StatisticalModel::from_examples(featurizer, catalog));
        let mut fitted = self.write_fitted();
        if catalog.generation() > fitted.generation {
            *fitted = Fitted { generation: catalog.generation(), model: refit };
        }
    }

    pub fn classify(
        &self,
        features: &FeatureSet,
        candidates: &[IntentDefinition],
    ) -> Result<Vec<IntentScore>, BackendError> {
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model();
        if features.embedding.len() != model.embedding_dim {
            return Err(BackendError::Unavailable(format!(
                "embedding has {} dimensions, model expects {}",
                features.embedding.len(),
                model.embedding_dim
            )));
        }

        let mut ranking = model.predict(&features.embedding, candidates);
        ranking.truncate(self.ranking_length);
        Ok(ranking)
    }
}

fn default_scale() -> f32 {
    DEFAULT_SCALE
}
