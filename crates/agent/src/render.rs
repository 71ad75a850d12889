use std::collections::BTreeMap;

use tera::{Context, Tera};
use tracing::warn;

use parley_core::catalog::IntentCatalog;
use parley_core::config::DialogueConfig;
use parley_core::domain::decision::{DialogueAction, DialogueDecision};

/// Separator that splits one rendered template into several messages.
pub const MESSAGE_SEPARATOR: &str = "###";

const CANCELLED_MESSAGE: &str = "Okay, I've cancelled that.";

/// Turns a dialogue action into user-facing messages. Intent templates are
/// Tera templates rendered against `slots`, `context` and `intent` (plus
/// `result` after an API call); a template that fails to render falls back
/// to a plain default.
#[derive(Clone, Debug)]
pub struct ResponseRenderer {
    fallback_message: String,
    handoff_message: String,
    api_failure_message: String,
}

impl ResponseRenderer {
    pub fn new(fallback_message: impl Into<String>, handoff_message: impl Into<String>) -> Self {
        let fallback_message = fallback_message.into();
        Self {
            api_failure_message: fallback_message.clone(),
            fallback_message,
            handoff_message: handoff_message.into(),
        }
    }

    pub fn with_api_failure_message(mut self, message: impl Into<String>) -> Self {
        self.api_failure_message = message.into();
        self
    }

    pub fn from_config(config: &DialogueConfig) -> Self {
        Self::new(&config.fallback_message, &config.handoff_message)
            .with_api_failure_message(&config.api_failure_message)
    }

    pub fn render(&self, decision: &DialogueDecision, catalog: &IntentCatalog) -> Vec<String> {
        self.render_with_result(decision, catalog, None)
    }

    /// Messages shown when an API-triggered intent's call fails.
    pub fn api_failure(&self) -> Vec<String> {
        split_messages(&self.api_failure_message)
    }

    /// Like [`ResponseRenderer::render`], exposing `result` to the execution
    /// template.
    pub fn render_with_result(
        &self,
        decision: &DialogueDecision,
        catalog: &IntentCatalog,
        result: Option<&serde_json::Value>,
    ) -> Vec<String> {
        let context = &decision.state.context;
        let text = match &decision.action {
            DialogueAction::AskForSlot { intent, prompt, .. } => {
                let filled = &decision.state.slots;
                self.template_or(prompt, intent, filled, context, None, || prompt.clone())
            }
            DialogueAction::Confirm { intent, slots } => {
                let template = catalog
                    .intent(intent)
                    .and_then(|definition| definition.confirmation_template.as_deref());
                match template {
                    Some(template) => {
                        self.template_or(template, intent, slots, context, None, || {
                            default_confirmation(intent, slots)
                        })
                    }
                    None => default_confirmation(intent, slots),
                }
            }
            DialogueAction::Execute { intent, slots } => {
                let template = catalog
                    .intent(intent)
                    .and_then(|definition| definition.response_template.as_deref());
                match template {
                    Some(template) => {
                        self.template_or(template, intent, slots, context, result, || {
                            default_execution(intent)
                        })
                    }
                    None => default_execution(intent),
                }
            }
            DialogueAction::ClarifyAmbiguousIntent { candidates } => clarification(candidates),
            DialogueAction::CannotUnderstand => self.fallback_message.clone(),
            DialogueAction::HandOff { .. } => self.handoff_message.clone(),
            DialogueAction::Cancelled { .. } => CANCELLED_MESSAGE.to_string(),
        };
        split_messages(&text)
    }

    fn template_or(
        &self,
        template: &str,
        intent: &str,
        slots: &BTreeMap<String, String>,
        context: &BTreeMap<String, serde_json::Value>,
        result: Option<&serde_json::Value>,
        default: impl FnOnce() -> String,
    ) -> String {
        if !template.contains("{{") && !template.contains("{%") {
            return template.to_string();
        }

        let mut tera_context = Context::new();
        tera_context.insert("intent", intent);
        tera_context.insert("slots", slots);
        tera_context.insert("context", context);
        if let Some(result) = result {
            tera_context.insert("result", result);
        }
        match Tera::one_off(template, &tera_context, false) {
            Ok(rendered) => rendered,
            Err(error) => {
                warn!(
                    event_name = "render.template_failed",
                    intent,
                    error = %error,
                    "response template failed to render, using default text"
                );
                default()
            }
        }
    }
}

impl Default for ResponseRenderer {
    fn default() -> Self {
        Self::from_config(&parley_core::config::AppConfig::default().dialogue)
    }
}

/// Splits on [`MESSAGE_SEPARATOR`], trimming each part and dropping empty ones.
pub fn split_messages(text: &str) -> Vec<String> {
    text.split(MESSAGE_SEPARATOR)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn humanize(name: &str) -> String {
    name.replace('_', " ")
}

fn default_confirmation(intent: &str, slots: &BTreeMap<String, String>) -> String {
    if slots.is_empty() {
        return format!("Shall I go ahead with {}?", humanize(intent));
    }
    let details = slots
        .iter()
        .map(|(slot, value)| format!("{}: {value}", humanize(slot)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("Shall I go ahead with {} ({details})?", humanize(intent))
}

fn default_execution(intent: &str) -> String {
    format!("Done: {}.", humanize(intent))
}

fn clarification(candidates: &[String]) -> String {
    let names = candidates.iter().map(|candidate| humanize(candidate)).collect::<Vec<_>>();
    match names.split_last() {
        Some((last, rest)) if !rest.is_empty() => {
            format!("Did you mean {} or {last}?", rest.join(", "))
        }
        Some((only, _)) => format!("Did you mean {only}?"),
        None => "Could you tell me what you would like to do?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use parley_core::catalog::IntentCatalog;
    use parley_core::dialogue::DialogueNode;
    use parley_core::domain::conversation::ConversationState;
    use parley_core::domain::decision::{DialogueAction, DialogueDecision};
    use parley_core::domain::intent::{IntentDefinition, SlotDefinition};

    use serde_json::json;

    use super::{split_messages, ResponseRenderer};

    fn catalog() -> IntentCatalog {
        let mut book = IntentDefinition::new("book_flight").with_slot(SlotDefinition::required(
            "destination",
            "text",
            "Where to?",
        ));
        book.confirmation_template =
            Some("Book a flight to {{ slots.destination }}?".to_string());
        book.response_template = Some(
            "Booked {{ slots.destination }}.### Anything else? ###  ".to_string(),
        );

        let mut status = IntentDefinition::new("order_status");
        status.response_template =
            Some("Order {{ slots.order_id }} is {{ result.status }}.".to_string());

        let mut broken = IntentDefinition::new("check_booking");
        broken.response_template = Some("Booking {{ slots.reference }} is fine.".to_string());

        IntentCatalog::new(vec![book, status, broken], Vec::new()).expect("catalog")
    }

    fn decision(action: DialogueAction) -> DialogueDecision {
        DialogueDecision {
            node: DialogueNode::AwaitingIntent,
            action,
            state: ConversationState::new("t1"),
            messages: Vec::new(),
        }
    }

    fn slots(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
    }

    #[test]
    fn confirmation_template_sees_the_slots() {
        let renderer = ResponseRenderer::default();
        let messages = renderer.render(
            &decision(DialogueAction::Confirm {
                intent: "book_flight".to_string(),
                slots: slots(&[("destination", "Paris")]),
            }),
            &catalog(),
        );
        assert_eq!(messages, vec!["Book a flight to Paris?".to_string()]);
    }

    #[test]
    fn execution_template_is_split_into_messages() {
        let renderer = ResponseRenderer::default();
        let messages = renderer.render(
            &decision(DialogueAction::Execute {
                intent: "book_flight".to_string(),
                slots: slots(&[("destination", "Paris")]),
            }),
            &catalog(),
        );
        assert_eq!(messages, vec!["Booked Paris.".to_string(), "Anything else?".to_string()]);
    }

    #[test]
    fn failing_template_falls_back_to_default_text() {
        let renderer = ResponseRenderer::default();
        let messages = renderer.render(
            &decision(DialogueAction::Execute {
                intent: "check_booking".to_string(),
                slots: BTreeMap::new(),
            }),
            &catalog(),
        );
        assert_eq!(messages, vec!["Done: check booking.".to_string()]);
    }

    #[test]
    fn non_template_actions_use_configured_text() {
        let renderer = ResponseRenderer::new("Say again?", "Transferring you.");
        let catalog = catalog();
        assert_eq!(
            renderer.render(&decision(DialogueAction::CannotUnderstand), &catalog),
            vec!["Say again?".to_string()]
        );
        assert_eq!(
            renderer.render(
                &decision(DialogueAction::HandOff { reason: "3 misses".to_string() }),
                &catalog
            ),
            vec!["Transferring you.".to_string()]
        );
        assert_eq!(
            renderer.render(
                &decision(DialogueAction::ClarifyAmbiguousIntent {
                    candidates: vec!["book_flight".to_string(), "check_booking".to_string()],
                }),
                &catalog
            ),
            vec!["Did you mean book flight or check booking?".to_string()]
        );
    }

    #[test]
    fn confirmation_without_template_lists_slots() {
        let renderer = ResponseRenderer::default();
        let messages = renderer.render(
            &decision(DialogueAction::Confirm {
                intent: "order_pizza".to_string(),
                slots: slots(&[("size", "large"), ("topping_count", "2")]),
            }),
            &IntentCatalog::empty(),
        );
        assert_eq!(
            messages,
            vec!["Shall I go ahead with order pizza (size: large, topping count: 2)?".to_string()]
        );
    }

    #[test]
    fn split_drops_blank_parts() {
        assert_eq!(split_messages(" a ###### b ###"), vec!["a".to_string(), "b".to_string()]);
        assert!(split_messages("  ").is_empty());
    }

    #[test]
    fn execution_template_sees_the_api_result() {
        let renderer = ResponseRenderer::default();
        let result = json!({"status": "shipped"});
        let messages = renderer.render_with_result(
            &decision(DialogueAction::Execute {
                intent: "order_status".to_string(),
                slots: slots(&[("order_id", "A-17")]),
            }),
            &catalog(),
            Some(&result),
        );
        assert_eq!(messages, vec!["Order A-17 is shipped.".to_string()]);
    }

    #[test]
    fn api_failure_uses_the_configured_message() {
        let renderer = ResponseRenderer::new("Say again?", "Transferring you.")
            .with_api_failure_message("Service is down.###Try later.");
        assert_eq!(
            renderer.api_failure(),
            vec!["Service is down.".to_string(), "Try later.".to_string()]
        );
        assert_eq!(
            ResponseRenderer::new("Say again?", "Transferring you.").api_failure(),
            vec!["Say again?".to_string()]
        );
    }
}
