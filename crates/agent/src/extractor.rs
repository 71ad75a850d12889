use std::collections::BTreeSet;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use parley_core::catalog::IntentCatalog;
use parley_core::domain::intent::{EntityDefinition, EntityKind, IntentDefinition};
use parley_core::domain::nlu::{Entity, ExtractorSource, Span};

use crate::featurizer::{tokenize, FeatureSet, CARDINAL_LABEL};

const FEATURIZER_CONFIDENCE: f32 = 0.8;
const PATTERN_CONFIDENCE: f32 = 1.0;
const SYNONYM_CONFIDENCE: f32 = 0.9;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("entity `{entity}` has an invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        entity: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug)]
struct EntityRules {
    definition: EntityDefinition,
    patterns: Vec<Regex>,
    /// Lowercased surface form tokens and their canonical value, longest first.
    synonyms: Vec<(Vec<String>, String)>,
}

impl EntityRules {
    fn compile(definition: &EntityDefinition) -> Result<Self, ExtractorError> {
        let patterns = definition
            .patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ExtractorError::InvalidPattern {
                    entity: definition.name.clone(),
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut synonyms = Vec::new();
        for (canonical, surfaces) in &definition.synonyms {
            for surface in std::iter::once(canonical).chain(surfaces) {
                let words = lowered_words(surface);
                if !words.is_empty() && !synonyms.iter().any(|(known, _)| *known == words) {
                    synonyms.push((words, canonical.clone()));
                }
            }
        }
        synonyms.sort_by(|left, right| right.0.len().cmp(&left.0.len()));

        Ok(Self { definition: definition.clone(), patterns, synonyms })
    }

    fn maps_label(&self, label: &str) -> bool {
        if self.definition.ner_labels.iter().any(|known| known == label) {
            return true;
        }
        self.definition.kind == EntityKind::Number
            && self.definition.ner_labels.is_empty()
            && label == CARDINAL_LABEL
    }

    fn canonical(&self, surface: &str) -> Option<&str> {
        let words = lowered_words(surface);
        self.synonyms
            .iter()
            .find(|(known, _)| *known == words)
            .map(|(_, canonical)| canonical.as_str())
    }
}

/// Entity rules compiled from one catalog snapshot.
#[derive(Debug)]
pub struct EntityExtractor {
    generation: u64,
    rules: Vec<EntityRules>,
}

impl EntityExtractor {
    pub fn compile(catalog: &IntentCatalog) -> Result<Self, ExtractorError> {
        let rules = catalog.entities().iter().map(EntityRules::compile).collect::<Result<_, _>>()?;
        Ok(Self { generation: catalog.generation(), rules })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Extracts typed entities. Named entities from the featurizer are mapped
    /// for every declared type; patterns and synonyms are scoped to the slot
    /// types of `intent_hint` when one is given.
    ///
    /// Overlapping spans of the same type keep the longer one, and the
    /// earlier extractor on equal length. Values the declared type rejects
    /// are dropped.
    pub fn extract(
        &self,
        features: &FeatureSet,
        text: &str,
        intent_hint: Option<&IntentDefinition>,
    ) -> Vec<Entity> {
        if features.is_empty() {
            return Vec::new();
        }

        let scope = intent_hint.map(|intent| {
            intent.slots.iter().map(|slot| slot.entity_type.as_str()).collect::<BTreeSet<_>>()
        });
        let in_scope = |rules: &EntityRules| {
            scope.as_ref().map_or(true, |types| types.contains(rules.definition.name.as_str()))
        };

        let mut candidates = Vec::new();
        for named in &features.entities {
            for rules in self.rules.iter().filter(|rules| rules.maps_label(&named.label)) {
                let value = rules.canonical(&named.text).unwrap_or(&named.text).to_string();
                let source = ExtractorSource::Featurizer;
                candidates.push(entity(rules, value, named.span, &named.text, source));
            }
        }
        for rules in self.rules.iter().filter(|rules| in_scope(rules)) {
            pattern_matches(rules, text, &mut candidates);
        }
        for rules in self.rules.iter().filter(|rules| in_scope(rules)) {
            synonym_matches(rules, features, &mut candidates);
        }

        let mut kept: Vec<Entity> = Vec::new();
        for candidate in candidates {
            let Some(rules) = self.rules.iter().find(|r| r.definition.name == candidate.entity_type)
            else {
                continue;
            };
            if !rules.definition.accepts(&candidate.value) {
                debug!(
                    event_name = "nlu.entity.dropped",
                    entity_type = %candidate.entity_type,
                    value = %candidate.value,
                    source = candidate.source.as_str(),
                    "entity value incompatible with declared type"
                );
                continue;
            }

            let overlapping = kept
                .iter()
                .filter(|existing| {
                    existing.entity_type == candidate.entity_type
                        && existing.raw_span.overlaps(&candidate.raw_span)
                })
                .map(|existing| existing.raw_span.len())
                .collect::<Vec<_>>();
            if overlapping.iter().all(|length| candidate.raw_span.len() > *length) {
                kept.retain(|existing| {
                    existing.entity_type != candidate.entity_type
                        || !existing.raw_span.overlaps(&candidate.raw_span)
                });
                kept.push(candidate);
            }
        }

        kept.sort_by(|left, right| {
            left.raw_span
                .start
                .cmp(&right.raw_span.start)
                .then_with(|| left.entity_type.cmp(&right.entity_type))
        });
        kept
    }
}

fn pattern_matches(rules: &EntityRules, text: &str, candidates: &mut Vec<Entity>) {
    for pattern in &rules.patterns {
        for captures in pattern.captures_iter(text) {
            let Some(matched) = captures.get(1).or_else(|| captures.get(0)) else {
                continue;
            };
            if matched.as_str().is_empty() {
                continue;
            }
            let span = Span::new(matched.start(), matched.end());
            let value = rules.canonical(matched.as_str()).unwrap_or(matched.as_str()).to_string();
            candidates.push(entity(rules, value, span, matched.as_str(), ExtractorSource::Pattern));
        }
    }
}

fn synonym_matches(rules: &EntityRules, features: &FeatureSet, candidates: &mut Vec<Entity>) {
    let tokens = &features.tokens;
    let mut index = 0;
    while index < tokens.len() {
        let found = rules.synonyms.iter().find(|(words, _)| {
            tokens.len() - index >= words.len()
                && words.iter().zip(&tokens[index..]).all(|(word, token)| *word == token.lower)
        });
        match found {
            Some((words, canonical)) => {
                let last = &tokens[index + words.len() - 1];
                let span = Span::new(tokens[index].span.start, last.span.end);
                let raw = &features.text[span.start..span.end];
                let value = canonical.clone();
                candidates.push(entity(rules, value, span, raw, ExtractorSource::Synonym));
                index += words.len();
            }
            None => index += 1,
        }
    }
}

fn entity(
    rules: &EntityRules,
    value: String,
    span: Span,
    raw_text: &str,
    source: ExtractorSource,
) -> Entity {
    let confidence = match source {
        ExtractorSource::Featurizer => FEATURIZER_CONFIDENCE,
        ExtractorSource::Pattern | ExtractorSource::FreeText => PATTERN_CONFIDENCE,
        ExtractorSource::Synonym => SYNONYM_CONFIDENCE,
    };
    Entity {
        entity_type: rules.definition.name.clone(),
        value,
        raw_span: span,
        raw_text: raw_text.to_string(),
        source,
        confidence,
    }
}

fn lowered_words(text: &str) -> Vec<String> {
    tokenize(text).into_iter().map(|(_, word)| word.to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use parley_core::catalog::IntentCatalog;
    use parley_core::domain::intent::{
        EntityDefinition, EntityKind, IntentDefinition, SlotDefinition,
    };
    use parley_core::domain::nlu::ExtractorSource;

    use super::{EntityExtractor, ExtractorError};
    use crate::featurizer::{Featurizer, LanguageModel};

    fn catalog() -> IntentCatalog {
        let mut city = EntityDefinition::new("city", EntityKind::Text);
        city.ner_labels = vec!["GPE".to_string()];
        city.synonyms = BTreeMap::from([
            ("New York".to_string(), vec!["nyc".to_string(), "big apple".to_string()]),
            ("Paris".to_string(), vec!["paris".to_string()]),
        ]);

        let mut reference = EntityDefinition::new("booking_ref", EntityKind::Text);
        reference.patterns = vec![r"\b([A-Z]{2}[0-9]{4})\b".to_string()];

        let mut seats = EntityDefinition::new("seat_count", EntityKind::Number);
        seats.patterns = vec![r"(?i)(\w+) seats".to_string()];

        let book_flight = IntentDefinition::new("book_flight")
            .with_slot(SlotDefinition::required("destination", "city", "Where to?"))
            .with_slot(SlotDefinition::required("passengers", "number", "How many?"))
            .with_slot(SlotDefinition::required("seats", "seat_count", "Seats?"));
        let check_booking = IntentDefinition::new("check_booking")
            .with_slot(SlotDefinition::required("booking_ref", "booking_ref", "Reference?"));

        IntentCatalog::new(vec![book_flight, check_booking], vec![city, reference, seats])
            .expect("catalog")
    }

    fn featurizer() -> Featurizer {
        Featurizer::new(LanguageModel::builtin_english(), 32).expect("featurizer")
    }

    #[test]
    fn featurizer_entities_are_canonicalized_and_win_ties() {
        let catalog = catalog();
        let extractor = EntityExtractor::compile(&catalog).expect("compile");
        let text = "book a flight to paris";
        let entities = extractor.extract(&featurizer().featurize(text), text, None);

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_type, "city");
        assert_eq!(entities[0].value, "Paris");
        assert_eq!(entities[0].raw_text, "paris");
        assert_eq!(entities[0].source, ExtractorSource::Featurizer);
    }

    #[test]
    fn longer_span_wins_on_overlap() {
        let catalog = catalog();
        let extractor = EntityExtractor::compile(&catalog).expect("compile");
        let text = "fly to the big apple";
        let entities = extractor.extract(&featurizer().featurize(text), text, None);

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].value, "New York");
        assert_eq!(entities[0].raw_text, "big apple");
        assert_eq!(entities[0].source, ExtractorSource::Synonym);
    }

    #[test]
    fn patterns_are_scoped_to_the_hinted_intent() {
        let catalog = catalog();
        let extractor = EntityExtractor::compile(&catalog).expect("compile");
        let featurizer = featurizer();
        let text = "my reference is AB1234";
        let features = featurizer.featurize(text);

        let unscoped = extractor.extract(&features, text, None);
        assert_eq!(unscoped.len(), 1);
        assert_eq!(unscoped[0].value, "AB1234");

        let scoped = extractor.extract(&features, text, catalog.intent("book_flight"));
        assert!(scoped.is_empty());
    }

    #[test]
    fn values_rejected_by_the_declared_type_are_dropped() {
        let catalog = catalog();
        let extractor = EntityExtractor::compile(&catalog).expect("compile");
        let featurizer = featurizer();

        let text = "three seats please";
        assert!(extractor.extract(&featurizer.featurize(text), text, None).is_empty());

        let text = "4 seats please";
        let entities = extractor.extract(&featurizer.featurize(text), text, None);
        let typed = entities
            .iter()
            .map(|entity| (entity.entity_type.as_str(), entity.value.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(typed, vec![("number", "4"), ("seat_count", "4")]);
    }

    #[test]
    fn empty_features_extract_nothing() {
        let catalog = catalog();
        let extractor = EntityExtractor::compile(&catalog).expect("compile");
        assert!(extractor.extract(&featurizer().featurize("  "), "  ", None).is_empty());
    }

    #[test]
    fn invalid_pattern_fails_compilation() {
        let mut broken = EntityDefinition::new("broken", EntityKind::Text);
        broken.patterns = vec!["([a-z".to_string()];
        let catalog = IntentCatalog::new(Vec::new(), vec![broken]).expect("catalog");

        let error = EntityExtractor::compile(&catalog).expect_err("invalid regex");
        assert!(matches!(
            error,
            ExtractorError::InvalidPattern { ref entity, .. } if entity == "broken"
        ));
    }
}
