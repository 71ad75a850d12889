use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Entity types every catalog understands without declaring them.
pub const BUILTIN_ENTITY_TYPES: &[(&str, EntityKind)] = &[
    ("text", EntityKind::Text),
    ("number", EntityKind::Number),
    ("free_text", EntityKind::FreeText),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    Text,
    Number,
    FreeText,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    #[serde(default)]
    pub kind: EntityKind,
    /// Regular expressions; the first capture group (or whole match) is the value.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Canonical value -> surface forms. The canonical value matches itself.
    #[serde(default)]
    pub synonyms: BTreeMap<String, Vec<String>>,
    /// Featurizer named-entity labels that map onto this type.
    #[serde(default)]
    pub ner_labels: Vec<String>,
}

impl EntityDefinition {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            patterns: Vec::new(),
            synonyms: BTreeMap::new(),
            ner_labels: Vec::new(),
        }
    }

    pub fn builtin(name: &str) -> Option<Self> {
        BUILTIN_ENTITY_TYPES
            .iter()
            .find(|(builtin, _)| *builtin == name)
            .map(|(builtin, kind)| Self::new(*builtin, *kind))
    }

    /// Whether `value` is compatible with the declared kind.
    pub fn accepts(&self, value: &str) -> bool {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return false;
        }
        match self.kind {
            EntityKind::Number => parse_number(trimmed).is_some(),
            EntityKind::Text | EntityKind::FreeText => true,
        }
    }
}

pub fn parse_number(value: &str) -> Option<f64> {
    value.trim().replace(',', "").parse::<f64>().ok().filter(|number| number.is_finite())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDefinition {
    pub name: String,
    pub entity_type: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub prompt: String,
}

impl SlotDefinition {
    pub fn required(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            required: true,
            prompt: prompt.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
    #[serde(alias = "delete")]
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Whether parameters travel in the request body rather than the query.
    pub fn has_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }
}

/// Outbound call made when an API-triggered intent executes. `url` and
/// `json_body` are templates over `intent`, `slots` and `context`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiDetails {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Send `json_body` (or the slots) as a JSON body instead of query parameters.
    #[serde(default)]
    pub is_json: bool,
    #[serde(default)]
    pub json_body: Option<String>,
}

impl ApiDetails {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self { url: url.into(), method, headers: BTreeMap::new(), is_json: false, json_body: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentDefinition {
    pub name: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub slots: Vec<SlotDefinition>,
    #[serde(default = "default_true")]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub confirmation_template: Option<String>,
    #[serde(default)]
    pub response_template: Option<String>,
    /// Executing the intent calls `api_details`; its JSON reply is exposed
    /// to `response_template` as `result`.
    #[serde(default)]
    pub api_trigger: bool,
    #[serde(default)]
    pub api_details: Option<ApiDetails>,
}

impl IntentDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            examples: Vec::new(),
            slots: Vec::new(),
            requires_confirmation: true,
            confirmation_template: None,
            response_template: None,
            api_trigger: false,
            api_details: None,
        }
    }

    pub fn with_api(mut self, details: ApiDetails) -> Self {
        self.api_trigger = true;
        self.api_details = Some(details);
        self
    }

    /// The call to make on execution, if the intent is API-triggered.
    pub fn api_call(&self) -> Option<&ApiDetails> {
        self.api_details.as_ref().filter(|_| self.api_trigger)
    }

    pub fn with_slot(mut self, slot: SlotDefinition) -> Self {
        self.slots.push(slot);
        self
    }

    pub fn with_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.examples.extend(examples.into_iter().map(Into::into));
        self
    }

    pub fn slot(&self, name: &str) -> Option<&SlotDefinition> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    /// Required slots without a value, in declaration order.
    pub fn missing_required_slots<'a>(
        &'a self,
        filled: &BTreeMap<String, String>,
    ) -> Vec<&'a SlotDefinition> {
        self.slots
            .iter()
            .filter(|slot| slot.required && !filled.contains_key(&slot.name))
            .collect()
    }

    pub fn first_missing_slot(&self, filled: &BTreeMap<String, String>) -> Option<&SlotDefinition> {
        self.missing_required_slots(filled).into_iter().next()
    }
}

fn default_true() -> bool {
    true
}
