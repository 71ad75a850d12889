use serde::{Deserialize, Serialize};

/// Byte offsets into the utterance text, end exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentScore {
    pub intent: String,
    pub confidence: f32,
}

impl IntentScore {
    pub fn new(intent: impl Into<String>, confidence: f32) -> Self {
        Self { intent: intent.into(), confidence }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorSource {
    Featurizer,
    Pattern,
    Synonym,
    FreeText,
}

impl ExtractorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Featurizer => "featurizer",
            Self::Pattern => "pattern",
            Self::Synonym => "synonym",
            Self::FreeText => "free_text",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub value: String,
    pub raw_span: Span,
    pub raw_text: String,
    pub source: ExtractorSource,
    pub confidence: f32,
}

/// Outcome of the confidence floor. `NoIntentMatched` is a business outcome,
/// not an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum IntentMatch {
    Matched(IntentScore),
    NoIntentMatched,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NluResult {
    /// Sorted by confidence descending, ties by catalog declaration order.
    pub ranking: Vec<IntentScore>,
    pub top: IntentMatch,
    pub entities: Vec<Entity>,
    /// Backends excluded from this call (timeouts, malformed output, errors).
    pub excluded_backends: Vec<String>,
}

impl NluResult {
    pub fn no_intent(entities: Vec<Entity>) -> Self {
        Self {
            ranking: Vec::new(),
            top: IntentMatch::NoIntentMatched,
            entities,
            excluded_backends: Vec::new(),
        }
    }

    pub fn matched_intent(&self) -> Option<&IntentScore> {
        match &self.top {
            IntentMatch::Matched(score) => Some(score),
            IntentMatch::NoIntentMatched => None,
        }
    }

    pub fn matched_intent_name(&self) -> Option<&str> {
        self.matched_intent().map(|score| score.intent.as_str())
    }

    pub fn is_no_intent(&self) -> bool {
        matches!(self.top, IntentMatch::NoIntentMatched)
    }

    pub fn entities_of_type<'a>(&'a self, entity_type: &'a str) -> impl Iterator<Item = &'a Entity> {
        self.entities.iter().filter(move |entity| entity.entity_type == entity_type)
    }
}
