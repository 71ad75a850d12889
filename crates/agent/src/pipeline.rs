use std::sync::{Arc, RwLock};

use tracing::{debug, error, info};

use parley_core::catalog::IntentCatalog;
use parley_core::domain::nlu::{IntentMatch, IntentScore, NluResult};
use parley_core::domain::utterance::Utterance;

use crate::classifier::{ClassifierBackend, IntentEnsemble};
use crate::extractor::{EntityExtractor, ExtractorError};
use crate::featurizer::{FeatureSet, Featurizer};

/// Featurize, classify and extract for one utterance.
///
/// Catalog-derived state (compiled entity rules, example prototypes) only
/// moves forward: it is rebuilt when a newer catalog generation is prepared.
pub struct NluPipeline {
    featurizer: Featurizer,
    ensemble: IntentEnsemble,
    extractor: RwLock<Arc<EntityExtractor>>,
}

impl NluPipeline {
    pub fn new(
        featurizer: Featurizer,
        ensemble: IntentEnsemble,
        catalog: &IntentCatalog,
    ) -> Result<Self, ExtractorError> {
        let extractor = EntityExtractor::compile(catalog)?;
        Ok(Self { featurizer, ensemble, extractor: RwLock::new(Arc::new(extractor)) })
    }

    pub fn featurizer(&self) -> &Featurizer {
        &self.featurizer
    }

    pub fn ensemble(&self) -> &IntentEnsemble {
        &self.ensemble
    }

    fn extractor(&self) -> Arc<EntityExtractor> {
        match self.extractor.read() {
            Ok(extractor) => Arc::clone(&extractor),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Rebuilds catalog-derived state when `catalog` is newer than the state
    /// already installed. Older or equal generations are ignored, and a
    /// catalog whose entity rules fail to compile keeps the previous rules.
    pub fn prepare(&self, catalog: &IntentCatalog) {
        if catalog.generation() <= self.extractor().generation() {
            return;
        }

        let compiled = match EntityExtractor::compile(catalog) {
            Ok(compiled) => Arc::new(compiled),
            Err(compile_error) => {
                error!(
                    event_name = "nlu.extractor.compile_failed",
                    generation = catalog.generation(),
                    error = %compile_error,
                    "entity rules failed to compile, keeping previous rules"
                );
                return;
            }
        };

        {
            let mut extractor = match self.extractor.write() {
                Ok(extractor) => extractor,
                Err(poisoned) => poisoned.into_inner(),
            };
            // a concurrent prepare may have installed a newer generation
            if extractor.generation() >= compiled.generation() {
                return;
            }
            *extractor = compiled;
        }

        for backend in self.ensemble.backends() {
            if let ClassifierBackend::Statistical(classifier) = backend {
                classifier.prepare(&self.featurizer, catalog);
            }
        }
        info!(
            event_name = "nlu.pipeline.prepared",
            generation = catalog.generation(),
            intents = catalog.intents().len(),
            "nlu pipeline prepared for catalog generation"
        );
    }

    /// Entity rules matching `catalog`. A turn still holding an older
    /// snapshot gets rules compiled for that snapshot without disturbing the
    /// installed ones.
    fn extractor_for(&self, catalog: &IntentCatalog) -> Arc<EntityExtractor> {
        let installed = self.extractor();
        if installed.generation() == catalog.generation() {
            return installed;
        }
        match EntityExtractor::compile(catalog) {
            Ok(compiled) => Arc::new(compiled),
            Err(_) => installed,
        }
    }

    /// Produces the NLU result for `utterance`. `active_intent` scopes
    /// pattern and synonym extraction to that intent's slot types.
    ///
    /// A `/intent_name` trigger naming a catalog intent bypasses the
    /// classifiers with confidence 1.0.
    pub async fn parse(
        &self,
        utterance: &Utterance,
        catalog: &IntentCatalog,
        active_intent: Option<&str>,
    ) -> NluResult {
        let features = self.featurizer.featurize(&utterance.text);
        self.parse_features(utterance, &features, catalog, active_intent).await
    }

    /// [`NluPipeline::parse`] over features computed by the caller, e.g. from
    /// raw channel bytes.
    pub async fn parse_features(
        &self,
        utterance: &Utterance,
        features: &FeatureSet,
        catalog: &IntentCatalog,
        active_intent: Option<&str>,
    ) -> NluResult {
        let extractor = self.extractor_for(catalog);
        let hint = active_intent.and_then(|name| catalog.intent(name));

        if let Some(direct) = utterance.direct_intent().and_then(|name| catalog.intent(name)) {
            debug!(
                event_name = "nlu.direct_trigger",
                thread_id = %utterance.thread_id,
                intent = %direct.name,
                "direct intent trigger bypasses classification"
            );
            let entities = extractor.extract(features, &utterance.text, Some(direct));
            let score = IntentScore::new(&direct.name, 1.0);
            return NluResult {
                ranking: vec![score.clone()],
                top: IntentMatch::Matched(score),
                entities,
                excluded_backends: Vec::new(),
            };
        }

        let (outcome, entities) = tokio::join!(self.ensemble.classify(features, catalog), async {
            extractor.extract(features, &utterance.text, hint)
        });

        NluResult {
            ranking: outcome.ranking,
            top: outcome.top,
            entities,
            excluded_backends: outcome.excluded,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use parley_core::catalog::{CatalogHandle, IntentCatalog};
    use parley_core::domain::intent::{
        EntityDefinition, EntityKind, IntentDefinition, SlotDefinition,
    };
    use parley_core::domain::nlu::{IntentMatch, IntentScore};
    use parley_core::domain::utterance::Utterance;

    use super::NluPipeline;
    use crate::classifier::{
        BackendError, ClassifierBackend, IntentClassifier, IntentEnsemble, ModelOrigin,
        StatisticalClassifier, StatisticalModel,
    };
    use crate::featurizer::{FeatureSet, Featurizer, LanguageModel};

    struct Keyword;

    #[async_trait]
    impl IntentClassifier for Keyword {
        fn name(&self) -> &str {
            "keyword"
        }

        async fn classify(
            &self,
            features: &FeatureSet,
            _candidates: &[IntentDefinition],
        ) -> Result<Vec<IntentScore>, BackendError> {
            if features.lemmas().any(|lemma| lemma == "flight") {
                Ok(vec![IntentScore::new("book_flight", 0.9)])
            } else {
                Ok(vec![IntentScore::new("greet", 0.2)])
            }
        }
    }

    fn catalog(with_ticket: bool) -> IntentCatalog {
        let mut city = EntityDefinition::new("city", EntityKind::Text);
        city.ner_labels = vec!["GPE".to_string()];
        let mut entities = vec![city];
        if with_ticket {
            let mut ticket = EntityDefinition::new("ticket", EntityKind::Text);
            ticket.patterns = vec![r"\b(T[0-9]{3})\b".to_string()];
            entities.push(ticket);
        }
        let intents = vec![
            IntentDefinition::new("greet").with_examples(["hello", "hi there"]),
            IntentDefinition::new("book_flight")
                .with_examples(["book a flight", "I need a flight"])
                .with_slot(SlotDefinition::required("destination", "city", "Where to?")),
        ];
        IntentCatalog::new(intents, entities).expect("catalog")
    }

    fn pipeline(catalog: &IntentCatalog) -> NluPipeline {
        let featurizer = Featurizer::new(LanguageModel::builtin_english(), 64).expect("featurizer");
        let ensemble =
            IntentEnsemble::new(vec![ClassifierBackend::External(Arc::new(Keyword))], 0.5);
        NluPipeline::new(featurizer, ensemble, catalog).expect("pipeline")
    }

    #[tokio::test]
    async fn classifies_and_extracts_in_one_pass() {
        let catalog = catalog(false);
        let pipeline = pipeline(&catalog);

        let result = pipeline
            .parse(&Utterance::new("t1", "book a flight to Paris"), &catalog, None)
            .await;

        assert_eq!(result.top, IntentMatch::Matched(IntentScore::new("book_flight", 0.9)));
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].entity_type, "city");
        assert_eq!(result.entities[0].value, "Paris");
        assert!(result.excluded_backends.is_empty());
    }

    #[tokio::test]
    async fn direct_trigger_bypasses_classifiers() {
        let catalog = catalog(false);
        let pipeline = pipeline(&catalog);

        let result = pipeline.parse(&Utterance::new("t1", "/greet"), &catalog, None).await;
        assert_eq!(result.top, IntentMatch::Matched(IntentScore::new("greet", 1.0)));

        let unknown = pipeline.parse(&Utterance::new("t1", "/order_pizza"), &catalog, None).await;
        assert!(unknown.is_no_intent());
    }

    #[tokio::test]
    async fn blank_utterance_yields_no_intent() {
        let catalog = catalog(false);
        let pipeline = pipeline(&catalog);

        let result = pipeline.parse(&Utterance::new("t1", "   "), &catalog, None).await;
        assert!(result.is_no_intent());
        assert!(result.entities.is_empty());
    }

    #[tokio::test]
    async fn new_catalog_generation_recompiles_entity_rules() {
        let initial = catalog(false);
        let pipeline = pipeline(&initial);
        let utterance = Utterance::new("t1", "ticket T123 please");

        assert!(pipeline.parse(&utterance, &initial, None).await.entities.is_empty());

        let handle = CatalogHandle::new(initial);
        handle.swap(catalog(true));
        let updated = handle.snapshot();
        pipeline.prepare(&updated);

        let entities = pipeline.parse(&utterance, &updated, None).await.entities;
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_type, "ticket");
        assert_eq!(entities[0].value, "T123");
    }

    #[tokio::test]
    async fn statistical_prototypes_follow_the_catalog() {
        let initial = catalog(false);
        let featurizer = Featurizer::new(LanguageModel::builtin_english(), 64).expect("featurizer");
        let model = StatisticalModel::from_examples(&featurizer, &initial);
        let statistical = StatisticalClassifier::new(model, ModelOrigin::Examples, &featurizer, 3)
            .expect("model");
        let ensemble = IntentEnsemble::new(vec![ClassifierBackend::Statistical(statistical)], 0.0);
        let pipeline = NluPipeline::new(featurizer, ensemble, &initial).expect("pipeline");

        let handle = CatalogHandle::new(initial);
        let mut intents = handle.snapshot().intents().to_vec();
        intents.push(IntentDefinition::new("check_weather").with_examples(["weather forecast"]));
        let entities = handle.snapshot().entities().to_vec();
        handle.swap(IntentCatalog::new(intents, entities).expect("catalog"));
        pipeline.prepare(&handle.snapshot());

        let ClassifierBackend::Statistical(classifier) = &pipeline.ensemble().backends()[0] else {
            panic!("statistical backend expected");
        };
        let known = classifier.model().intents().map(str::to_string).collect::<Vec<_>>();
        assert!(known.contains(&"check_weather".to_string()));
    }

    #[tokio::test]
    async fn older_generation_does_not_roll_back_entity_rules() {
        let initial = catalog(false);
        let pipeline = pipeline(&initial);
        let utterance = Utterance::new("t1", "ticket T123 please");

        let handle = CatalogHandle::new(initial);
        let first = handle.snapshot();
        handle.swap(catalog(true));
        let second = handle.snapshot();
        assert_eq!((first.generation(), second.generation()), (1, 2));

        pipeline.prepare(&second);
        pipeline.prepare(&first);

        let entities = pipeline.parse(&utterance, &second, None).await.entities;
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].value, "T123");

        // a turn that still holds the older snapshot sees that snapshot's rules
        assert!(pipeline.parse(&utterance, &first, None).await.entities.is_empty());
        let entities = pipeline.parse(&utterance, &second, None).await.entities;
        assert_eq!(entities.len(), 1);
    }
}
