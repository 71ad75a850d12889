use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use parley_core::domain::intent::parse_number;
use parley_core::domain::nlu::Span;

/// Named-entity label assigned to numeric tokens.
pub const CARDINAL_LABEL: &str = "CARDINAL";

const BUILTIN_STOP_WORDS: &[&str] = &[
    "a", "an", "the", "to", "for", "of", "on", "in", "at", "by", "with", "from", "and", "or",
    "is", "are", "was", "be", "it", "this", "that", "me", "my", "i", "you", "your", "we", "our",
    "please", "can", "could", "would", "will", "do", "does", "some", "any",
];

const BUILTIN_LEMMAS: &[(&str, &str)] = &[
    ("am", "be"),
    ("are", "be"),
    ("is", "be"),
    ("was", "be"),
    ("were", "be"),
    ("flew", "fly"),
    ("flown", "fly"),
    ("flies", "fly"),
    ("went", "go"),
    ("gone", "go"),
    ("got", "get"),
    ("bought", "buy"),
    ("people", "person"),
    ("children", "child"),
    ("tickets", "ticket"),
];

const BUILTIN_PLACES: &[&str] = &[
    "Amsterdam",
    "Berlin",
    "Dublin",
    "Lisbon",
    "London",
    "Los Angeles",
    "Madrid",
    "New York",
    "Paris",
    "Rome",
    "San Francisco",
    "Sydney",
    "Tokyo",
    "Toronto",
];

#[derive(Debug, Error)]
pub enum FeaturizerError {
    #[error("failed to read language model `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse language model `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("embedding dimension must be greater than zero")]
    InvalidDimension,
}

/// Lexical resources the featurizer runs on: stop words, a lemma table and
/// a gazetteer of named-entity phrases keyed by label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LanguageModel {
    pub name: String,
    stop_words: BTreeSet<String>,
    lemmas: BTreeMap<String, String>,
    /// Tokenized, lowercased phrases with their label, longest first.
    gazetteer: Vec<(Vec<String>, String)>,
}

#[derive(Debug, Deserialize)]
struct LanguageModelFile {
    name: Option<String>,
    #[serde(default = "default_true")]
    extends_builtin: bool,
    #[serde(default)]
    stop_words: Vec<String>,
    #[serde(default)]
    lemmas: BTreeMap<String, String>,
    #[serde(default)]
    gazetteer: BTreeMap<String, Vec<String>>,
}

impl LanguageModel {
    pub fn builtin_english() -> Self {
        let mut model = Self {
            name: "en-builtin".to_string(),
            stop_words: BTreeSet::new(),
            lemmas: BTreeMap::new(),
            gazetteer: Vec::new(),
        };
        model.stop_words.extend(BUILTIN_STOP_WORDS.iter().map(|word| word.to_string()));
        model.lemmas.extend(
            BUILTIN_LEMMAS.iter().map(|(form, lemma)| (form.to_string(), lemma.to_string())),
        );
        for place in BUILTIN_PLACES {
            model.add_phrase("GPE", place);
        }
        model.sort_gazetteer();
        model
    }

    /// Loads a TOML language model. Failure is an initialization failure.
    pub fn load(path: &Path) -> Result<Self, FeaturizerError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| FeaturizerError::Read { path: path.to_path_buf(), source })?;
        Self::parse(&raw, path)
    }

    pub fn parse(raw: &str, path: &Path) -> Result<Self, FeaturizerError> {
        let file: LanguageModelFile = toml::from_str(raw)
            .map_err(|source| FeaturizerError::Parse { path: path.to_path_buf(), source })?;

        let mut model = if file.extends_builtin {
            Self::builtin_english()
        } else {
            Self {
                name: String::new(),
                stop_words: BTreeSet::new(),
                lemmas: BTreeMap::new(),
                gazetteer: Vec::new(),
            }
        };
        model.name = file.name.unwrap_or_else(|| path.display().to_string());
        model.stop_words.extend(file.stop_words.iter().map(|word| word.to_lowercase()));
        model.lemmas.extend(
            file.lemmas
                .into_iter()
                .map(|(form, lemma)| (form.to_lowercase(), lemma.to_lowercase())),
        );
        for (label, phrases) in &file.gazetteer {
            for phrase in phrases {
                model.add_phrase(label, phrase);
            }
        }
        model.sort_gazetteer();
        Ok(model)
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(word)
    }

    pub fn lemma(&self, lower: &str) -> String {
        if let Some(lemma) = self.lemmas.get(lower) {
            return lemma.clone();
        }
        suffix_lemma(lower)
    }

    fn add_phrase(&mut self, label: &str, phrase: &str) {
        let words =
            tokenize(phrase).into_iter().map(|(_, word)| word.to_lowercase()).collect::<Vec<_>>();
        if !words.is_empty() && !self.gazetteer.iter().any(|(known, _)| *known == words) {
            self.gazetteer.push((words, label.to_string()));
        }
    }

    fn sort_gazetteer(&mut self) {
        self.gazetteer.sort_by(|left, right| right.0.len().cmp(&left.0.len()));
    }
}

impl Default for LanguageModel {
    fn default() -> Self {
        Self::builtin_english()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub text: String,
    pub lower: String,
    pub lemma: String,
    pub span: Span,
    pub is_stop: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NamedEntitySpan {
    pub label: String,
    pub text: String,
    pub span: Span,
}

/// Linguistic view of one utterance. Token and entity spans are byte
/// offsets into `text`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureSet {
    pub text: String,
    pub tokens: Vec<Token>,
    pub entities: Vec<NamedEntitySpan>,
    pub embedding: Vec<f32>,
}

impl FeatureSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn lemmas(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(|token| token.lemma.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct Featurizer {
    model: Arc<LanguageModel>,
    embedding_dim: usize,
}

impl Featurizer {
    pub fn new(model: LanguageModel, embedding_dim: usize) -> Result<Self, FeaturizerError> {
        if embedding_dim == 0 {
            return Err(FeaturizerError::InvalidDimension);
        }
        Ok(Self { model: Arc::new(model), embedding_dim })
    }

    /// Builds the featurizer from an optional model file; the built-in
    /// English lexicon is used when no path is configured.
    pub fn from_path(path: Option<&Path>, embedding_dim: usize) -> Result<Self, FeaturizerError> {
        let model = match path {
            Some(path) => LanguageModel::load(path)?,
            None => LanguageModel::builtin_english(),
        };
        Self::new(model, embedding_dim)
    }

    pub fn model(&self) -> &LanguageModel {
        &self.model
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Deterministic for a given text and model. Blank text yields an empty
    /// feature set.
    pub fn featurize(&self, text: &str) -> FeatureSet {
        if text.trim().is_empty() {
            return FeatureSet::empty();
        }

        let tokens = tokenize(text)
            .into_iter()
            .map(|(span, word)| {
                let lower = word.to_lowercase();
                Token {
                    lemma: self.model.lemma(&lower),
                    is_stop: self.model.is_stop_word(&lower),
                    text: word.to_string(),
                    lower,
                    span,
                }
            })
            .collect::<Vec<_>>();
        let entities = self.recognize(text, &tokens);
        let embedding = self.embed(&tokens);

        FeatureSet { text: text.to_string(), tokens, entities, embedding }
    }

    /// Byte input from channels that do not guarantee UTF-8. Malformed input
    /// degrades to an empty feature set.
    pub fn featurize_bytes(&self, raw: &[u8]) -> FeatureSet {
        match std::str::from_utf8(raw) {
            Ok(text) => self.featurize(text),
            Err(error) => {
                warn!(
                    event_name = "nlu.featurizer.degraded",
                    error = %error,
                    "utterance is not valid utf-8, continuing with empty features"
                );
                FeatureSet::empty()
            }
        }
    }

    fn recognize(&self, text: &str, tokens: &[Token]) -> Vec<NamedEntitySpan> {
        let mut entities = Vec::new();
        let mut index = 0;

        while index < tokens.len() {
            let phrase = self.model.gazetteer.iter().find(|(words, _)| {
                tokens.len() - index >= words.len()
                    && words.iter().zip(&tokens[index..]).all(|(word, token)| *word == token.lower)
            });

            if let Some((words, label)) = phrase {
                let last = &tokens[index + words.len() - 1];
                let span = Span::new(tokens[index].span.start, last.span.end);
                entities.push(NamedEntitySpan {
                    label: label.clone(),
                    text: text[span.start..span.end].to_string(),
                    span,
                });
                index += words.len();
                continue;
            }

            let token = &tokens[index];
            if parse_number(&token.text).is_some() {
                entities.push(NamedEntitySpan {
                    label: CARDINAL_LABEL.to_string(),
                    text: token.text.clone(),
                    span: token.span,
                });
            }
            index += 1;
        }

        entities
    }

    /// Signed feature hashing of content lemmas and their character
    /// trigrams, L2-normalized.
    fn embed(&self, tokens: &[Token]) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.embedding_dim];
        let content = tokens.iter().filter(|token| !token.is_stop).collect::<Vec<_>>();
        let selected = if content.is_empty() { tokens.iter().collect() } else { content };

        for token in selected {
            self.add_feature(&mut vector, &format!("w:{}", token.lemma), 1.0);
            let padded = format!("#{}#", token.lemma).chars().collect::<Vec<_>>();
            for window in padded.windows(3) {
                let trigram = window.iter().collect::<String>();
                self.add_feature(&mut vector, &format!("c:{trigram}"), 0.35);
            }
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|value| *value /= norm);
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let index = (hash % self.embedding_dim as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

/// Cosine similarity of two equally sized vectors; zero when either is empty.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let dot = left.iter().zip(right).map(|(l, r)| l * r).sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

/// Splits text into word tokens with byte spans. Apostrophes inside words
/// and digit group separators (`1,200`, `3.5`) stay inside the token.
pub(crate) fn tokenize(text: &str) -> Vec<(Span, &str)> {
    let chars = text.char_indices().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (position, &(offset, character)) in chars.iter().enumerate() {
        let previous = position.checked_sub(1).map(|index| chars[index].1);
        let next = chars.get(position + 1).map(|(_, next)| *next);
        let joins = match character {
            '\'' => {
                previous.is_some_and(char::is_alphanumeric)
                    && next.is_some_and(char::is_alphanumeric)
            }
            ',' | '.' => {
                previous.is_some_and(|c| c.is_ascii_digit())
                    && next.is_some_and(|c| c.is_ascii_digit())
            }
            _ => false,
        };

        if character.is_alphanumeric() || (joins && start.is_some()) {
            start.get_or_insert(offset);
        } else if let Some(begin) = start.take() {
            tokens.push((Span::new(begin, offset), &text[begin..offset]));
        }
    }
    if let Some(begin) = start {
        tokens.push((Span::new(begin, text.len()), &text[begin..]));
    }
    tokens
}

fn suffix_lemma(lower: &str) -> String {
    let length = lower.chars().count();
    if !lower.is_ascii() || length <= 3 {
        return lower.to_string();
    }
    if let Some(stem) = lower.strip_suffix("ies") {
        return format!("{stem}y");
    }
    if lower.ends_with("sses") {
        return lower[..lower.len() - 2].to_string();
    }
    let keeps_s = ["ss", "us", "is"].iter().any(|ending| lower.ends_with(ending));
    if lower.ends_with('s') && !keeps_s {
        return lower[..lower.len() - 1].to_string();
    }
    if length > 5 {
        if let Some(stem) = lower.strip_suffix("ing") {
            return undouble(stem);
        }
    }
    if length > 4 {
        if let Some(stem) = lower.strip_suffix("ed") {
            return undouble(stem);
        }
    }
    lower.to_string()
}

fn undouble(stem: &str) -> String {
    let bytes = stem.as_bytes();
    match bytes {
        [.., a, b] if a == b && !matches!(a, b'l' | b's' | b'z') => {
            stem[..stem.len() - 1].to_string()
        }
        _ => stem.to_string(),
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

fn default_true() -> bool {
    true
}
