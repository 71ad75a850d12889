use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use tracing::debug;

use parley_core::domain::intent::IntentDefinition;
use parley_core::domain::nlu::IntentScore;

use super::BackendError;
use crate::featurizer::FeatureSet;
use crate::llm::LlmClient;

const PROMPT_TEMPLATE: &str = r#"You classify user messages for a conversational assistant.
Pick the single intent that best matches the message, or null when none fits.

Intents:
{% for intent in intents %}- {{ intent.name }}{% if intent.examples %} (e.g. {{ intent.examples | join(sep="; ") }}){% endif %}
{% endfor %}
Answer with JSON only: {"intent": "<intent name or null>", "confidence": <number from 0 to 1>}

Message: {{ text }}"#;

const PROMPT_EXAMPLES: usize = 3;

#[derive(Serialize)]
struct PromptIntent<'a> {
    name: &'a str,
    examples: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ZeroShotReply {
    intent: Option<String>,
    confidence: Option<f64>,
}

/// Zero-shot backend: asks an LLM to pick among the candidate intents.
/// Each attempt is bounded by `timeout`.
pub struct ZeroShotClassifier {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
    max_retries: u32,
}

impl ZeroShotClassifier {
    pub fn new(client: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { client, timeout, max_retries: 0 }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn render_prompt(
        text: &str,
        candidates: &[IntentDefinition],
    ) -> Result<String, BackendError> {
        let intents = candidates
            .iter()
            .map(|intent| PromptIntent {
                name: &intent.name,
                examples: &intent.examples[..intent.examples.len().min(PROMPT_EXAMPLES)],
            })
            .collect::<Vec<_>>();

        let mut context = Context::new();
        context.insert("intents", &intents);
        context.insert("text", text);
        Tera::one_off(PROMPT_TEMPLATE, &context, false)
            .map_err(|error| BackendError::Unavailable(format!("prompt rendering failed: {error}")))
    }

    pub async fn classify(
        &self,
        features: &FeatureSet,
        candidates: &[IntentDefinition],
    ) -> Result<Vec<IntentScore>, BackendError> {
        if features.is_empty() || candidates.is_empty() {
            return Ok(Vec::new());
        }
        let prompt = Self::render_prompt(&features.text, candidates)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(&prompt, candidates).await {
                Ok(scores) => return Ok(scores),
                Err(error @ BackendError::MalformedResponse(_)) => return Err(error),
                Err(error) if attempt > self.max_retries => return Err(error),
                Err(error) => {
                    debug!(
                        event_name = "nlu.zero_shot.retry",
                        attempt,
                        error = %error,
                        "retrying zero-shot classification"
                    );
                }
            }
        }
    }

    async fn attempt(
        &self,
        prompt: &str,
        candidates: &[IntentDefinition],
    ) -> Result<Vec<IntentScore>, BackendError> {
        let raw = tokio::time::timeout(self.timeout, self.client.complete(prompt))
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))?
            .map_err(|error| BackendError::Unavailable(error.to_string()))?;
        Ok(parse_reply(&raw, candidates)?.into_iter().collect())
    }
}

/// Parses an untrusted completion. Surrounding prose and code fences are
/// tolerated; an unknown intent or a non-finite confidence is malformed.
pub fn parse_reply(
    raw: &str,
    candidates: &[IntentDefinition],
) -> Result<Option<IntentScore>, BackendError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let body = match (start, end) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => return Err(BackendError::MalformedResponse("no json object in reply".to_string())),
    };

    let reply: ZeroShotReply = serde_json::from_str(body)
        .map_err(|error| BackendError::MalformedResponse(error.to_string()))?;

    let intent = match reply.intent.as_deref().map(str::trim) {
        None | Some("") => return Ok(None),
        Some(name) if name.eq_ignore_ascii_case("null") || name.eq_ignore_ascii_case("none") => {
            return Ok(None)
        }
        Some(name) => name,
    };
    if !candidates.iter().any(|candidate| candidate.name == intent) {
        return Err(BackendError::MalformedResponse(format!("unknown intent `{intent}`")));
    }

    let confidence = reply.confidence.unwrap_or(1.0);
    if !confidence.is_finite() {
        return Err(BackendError::MalformedResponse("confidence is not a number".to_string()));
    }
    Ok(Some(IntentScore::new(intent, confidence.clamp(0.0, 1.0) as f32)))
}
