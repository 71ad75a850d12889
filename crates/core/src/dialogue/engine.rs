use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::catalog::IntentCatalog;
use crate::config::AppConfig;
use crate::dialogue::lexicon::{classify_reply, Reply};
use crate::dialogue::states::{DialogueNode, DialogueSignal, TransitionOutcome};
use crate::domain::conversation::{ConversationState, Turn};
use crate::domain::decision::{DialogueAction, DialogueDecision};
use crate::domain::intent::{EntityKind, IntentDefinition, SlotDefinition};
use crate::domain::nlu::{Entity, NluResult};
use crate::domain::utterance::Utterance;

#[derive(Clone, Debug, PartialEq)]
pub struct DialoguePolicy {
    pub confidence_threshold: f32,
    /// Zero disables ambiguity clarification.
    pub ambiguity_margin: f32,
    pub max_turns: usize,
    pub max_slot_reasks: u32,
    pub max_fallbacks: u32,
    pub affirm_intent: String,
    pub deny_intent: String,
    pub cancel_intent: String,
}

impl Default for DialoguePolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            ambiguity_margin: 0.0,
            max_turns: 20,
            max_slot_reasks: 3,
            max_fallbacks: 3,
            affirm_intent: "affirm".to_owned(),
            deny_intent: "deny".to_owned(),
            cancel_intent: "cancel".to_owned(),
        }
    }
}

impl DialoguePolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            confidence_threshold: config.nlu.confidence_threshold,
            ambiguity_margin: config.nlu.ambiguity_margin,
            max_turns: config.dialogue.max_turns,
            max_slot_reasks: config.dialogue.max_slot_reasks,
            max_fallbacks: config.dialogue.max_fallbacks,
            affirm_intent: config.dialogue.affirm_intent.clone(),
            deny_intent: config.dialogue.deny_intent.clone(),
            cancel_intent: config.dialogue.cancel_intent.clone(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DialogueTransitionError {
    #[error("intent `{intent}` is not present in the active catalog")]
    UnknownIntent { intent: String },
    #[error("invalid dialogue transition from {node} on signal {signal}")]
    InvalidTransition { node: DialogueNode, signal: &'static str },
}

/// Moore machine over [`DialogueNode`]: the emitted action is a function of the
/// node entered, which is a function of the prior state and the NLU result.
#[derive(Clone, Debug, Default)]
pub struct DialogueEngine {
    policy: DialoguePolicy,
}

impl DialogueEngine {
    pub fn new(policy: DialoguePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DialoguePolicy {
        &self.policy
    }

    pub fn initial_node(&self) -> DialogueNode {
        DialogueNode::AwaitingIntent
    }

    /// Maps an NLU result onto the signal the current node understands.
    pub fn interpret(
        &self,
        state: &ConversationState,
        nlu: &NluResult,
        text: &str,
        catalog: &IntentCatalog,
    ) -> DialogueSignal {
        let matched = nlu.matched_intent_name();
        if matched == Some(self.policy.cancel_intent.as_str()) {
            return DialogueSignal::Cancel;
        }

        match state.node.clone().settle() {
            DialogueNode::AwaitingIntent | DialogueNode::Executing { .. } | DialogueNode::Fallback => {
                let Some(intent) = matched else {
                    return DialogueSignal::NoIntentMatched;
                };
                if let Some(candidates) = self.ambiguous_candidates(nlu) {
                    return DialogueSignal::AmbiguousIntent { candidates };
                }
                let slots = catalog
                    .intent(intent)
                    .map(|definition| {
                        assign_slot_values(definition, &BTreeMap::new(), None, &nlu.entities, text, catalog)
                    })
                    .unwrap_or_default();
                DialogueSignal::IntentRecognized { intent: intent.to_owned(), slots }
            }
            DialogueNode::SlotFilling { intent, pending_slot } => {
                let values = catalog
                    .intent(&intent)
                    .map(|definition| {
                        assign_slot_values(
                            definition,
                            &state.slots,
                            Some(pending_slot.as_str()),
                            &nlu.entities,
                            text,
                            catalog,
                        )
                    })
                    .unwrap_or_default();
                DialogueSignal::SlotValues { values }
            }
            DialogueNode::Confirming { .. } => {
                if matched == Some(self.policy.affirm_intent.as_str()) {
                    return DialogueSignal::Affirm;
                }
                if matched == Some(self.policy.deny_intent.as_str()) {
                    return DialogueSignal::Deny;
                }
                match classify_reply(text) {
                    Some(Reply::Yes) => DialogueSignal::Affirm,
                    Some(Reply::No) => DialogueSignal::Deny,
                    None => DialogueSignal::Unclear,
                }
            }
        }
    }

    pub fn transition(
        &self,
        state: &ConversationState,
        signal: &DialogueSignal,
        catalog: &IntentCatalog,
    ) -> Result<TransitionOutcome, DialogueTransitionError> {
        use DialogueSignal::{
            Affirm, AmbiguousIntent, Cancel, Deny, IntentRecognized, NoIntentMatched, SlotValues,
            Unclear,
        };

        let from = state.node.clone().settle();
        let invalid = || DialogueTransitionError::InvalidTransition {
            node: from.clone(),
            signal: signal.label(),
        };

        match (&from, signal) {
            (_, Cancel) => Ok(self.outcome(
                state,
                signal,
                DialogueNode::AwaitingIntent,
                DialogueAction::Cancelled { intent: from.intent().map(str::to_owned) },
                BTreeMap::new(),
                0,
            )),
            (_, NoIntentMatched) => Ok(self.fallback(state, signal, 0)),
            (DialogueNode::AwaitingIntent, AmbiguousIntent { candidates }) => Ok(self.outcome(
                state,
                signal,
                DialogueNode::AwaitingIntent,
                DialogueAction::ClarifyAmbiguousIntent { candidates: candidates.clone() },
                BTreeMap::new(),
                0,
            )),
            (DialogueNode::AwaitingIntent, IntentRecognized { intent, slots }) => {
                let definition = self.intent(catalog, intent)?;
                Ok(self.advance(state, signal, definition, slots.clone(), 0))
            }
            (DialogueNode::SlotFilling { intent, .. }, SlotValues { values }) => {
                let definition = self.intent(catalog, intent)?;
                let before = definition.missing_required_slots(&state.slots).len();
                let mut slots = state.slots.clone();
                slots.extend(values.iter().map(|(slot, value)| (slot.clone(), value.clone())));
                let after = definition.missing_required_slots(&slots).len();

                let slot_reasks = if after < before { 0 } else { state.slot_reasks + 1 };
                if after > 0 && slot_reasks > self.policy.max_slot_reasks {
                    return Ok(self.fallback(state, signal, 0));
                }
                Ok(self.advance(state, signal, definition, slots, slot_reasks))
            }
            (DialogueNode::Confirming { intent }, Affirm) => {
                self.intent(catalog, intent)?;
                Ok(self.outcome(
                    state,
                    signal,
                    DialogueNode::Executing { intent: intent.clone() },
                    DialogueAction::Execute { intent: intent.clone(), slots: state.slots.clone() },
                    state.slots.clone(),
                    0,
                ))
            }
            (DialogueNode::Confirming { intent }, Deny) => {
                let definition = self.intent(catalog, intent)?;
                let Some(first) = definition.slots.first() else {
                    return Ok(self.outcome(
                        state,
                        signal,
                        DialogueNode::AwaitingIntent,
                        DialogueAction::Cancelled { intent: Some(intent.clone()) },
                        BTreeMap::new(),
                        0,
                    ));
                };
                let mut slots = state.slots.clone();
                slots.remove(&first.name);
                Ok(self.outcome(
                    state,
                    signal,
                    DialogueNode::SlotFilling {
                        intent: intent.clone(),
                        pending_slot: first.name.clone(),
                    },
                    ask_for(intent, first),
                    slots,
                    0,
                ))
            }
            (DialogueNode::Confirming { intent }, Unclear) => {
                self.intent(catalog, intent)?;
                Ok(self.outcome(
                    state,
                    signal,
                    DialogueNode::Confirming { intent: intent.clone() },
                    DialogueAction::Confirm { intent: intent.clone(), slots: state.slots.clone() },
                    state.slots.clone(),
                    0,
                ))
            }
            _ => Err(invalid()),
        }
    }

    /// Computes the next state for one turn. Never fails: a transition error
    /// degrades to `FALLBACK`.
    pub fn decide(
        &self,
        state: &ConversationState,
        nlu: &NluResult,
        utterance: &Utterance,
        catalog: &IntentCatalog,
    ) -> DialogueDecision {
        self.decide_inner(state, nlu, utterance, catalog).0
    }

    pub fn decide_with_audit<S>(
        &self,
        state: &ConversationState,
        nlu: &NluResult,
        utterance: &Utterance,
        catalog: &IntentCatalog,
        sink: &S,
        audit: &AuditContext,
    ) -> DialogueDecision
    where
        S: AuditSink + ?Sized,
    {
        let (decision, event) = self.decide_audited(state, nlu, utterance, catalog, audit);
        sink.emit(event);
        decision
    }

    /// Decides the turn and builds its audit event without emitting it, so
    /// callers that persist the decision can emit only once the write lands.
    pub fn decide_audited(
        &self,
        state: &ConversationState,
        nlu: &NluResult,
        utterance: &Utterance,
        catalog: &IntentCatalog,
        audit: &AuditContext,
    ) -> (DialogueDecision, AuditEvent) {
        let (decision, error) = self.decide_inner(state, nlu, utterance, catalog);
        let event = match &error {
            None => audit.event(
                "dialogue.transition_applied",
                AuditCategory::Dialogue,
                AuditOutcome::Success,
            ),
            Some(error) => audit
                .event(
                    "dialogue.transition_rejected",
                    AuditCategory::Dialogue,
                    AuditOutcome::Rejected,
                )
                .with_metadata("error", error.to_string()),
        }
        .with_metadata("from", state.node.to_string())
        .with_metadata("to", decision.node.to_string())
        .with_metadata("action", decision.action.action_key())
        .with_metadata("version", decision.state.version.to_string());
        (decision, event)
    }

    fn decide_inner(
        &self,
        state: &ConversationState,
        nlu: &NluResult,
        utterance: &Utterance,
        catalog: &IntentCatalog,
    ) -> (DialogueDecision, Option<DialogueTransitionError>) {
        let signal = self.interpret(state, nlu, &utterance.text, catalog);
        let (outcome, error) = match self.transition(state, &signal, catalog) {
            Ok(outcome) => (outcome, None),
            Err(error) => (self.fallback(state, &DialogueSignal::NoIntentMatched, 0), Some(error)),
        };

        let mut next = state.clone();
        next.version = state.version + 1;
        next.node = outcome.to.clone().settle();
        next.slots = if outcome.to.is_terminal() { BTreeMap::new() } else { outcome.slots.clone() };
        next.slot_reasks = outcome.slot_reasks;
        next.fallback_streak = outcome.fallback_streak;
        if let Some(channel) = &utterance.channel {
            next.context
                .extend(channel.context.iter().map(|(key, value)| (key.clone(), value.clone())));
        }
        next.record_turn(
            Turn {
                text: utterance.text.clone(),
                received_at: utterance.received_at,
                intent: nlu.matched_intent_name().map(str::to_owned),
                action: outcome.action.clone(),
            },
            self.policy.max_turns,
        );
        next.updated_at = Utc::now();

        let decision =
            DialogueDecision { node: outcome.to, action: outcome.action, state: next, messages: Vec::new() };
        (decision, error)
    }

    fn intent<'a>(
        &self,
        catalog: &'a IntentCatalog,
        intent: &str,
    ) -> Result<&'a IntentDefinition, DialogueTransitionError> {
        catalog
            .intent(intent)
            .ok_or_else(|| DialogueTransitionError::UnknownIntent { intent: intent.to_owned() })
    }

    /// Next node once an intent is known: ask for the first missing required
    /// slot, otherwise confirm (or execute directly when no confirmation is needed).
    fn advance(
        &self,
        state: &ConversationState,
        signal: &DialogueSignal,
        definition: &IntentDefinition,
        slots: BTreeMap<String, String>,
        slot_reasks: u32,
    ) -> TransitionOutcome {
        let intent = definition.name.clone();
        if let Some(missing) = definition.first_missing_slot(&slots) {
            let action = ask_for(&intent, missing);
            let to = DialogueNode::SlotFilling { intent, pending_slot: missing.name.clone() };
            return self.outcome(state, signal, to, action, slots, slot_reasks);
        }

        if definition.requires_confirmation {
            let action = DialogueAction::Confirm { intent: intent.clone(), slots: slots.clone() };
            self.outcome(state, signal, DialogueNode::Confirming { intent }, action, slots, 0)
        } else {
            let action = DialogueAction::Execute { intent: intent.clone(), slots: slots.clone() };
            self.outcome(state, signal, DialogueNode::Executing { intent }, action, slots, 0)
        }
    }

    fn fallback(
        &self,
        state: &ConversationState,
        signal: &DialogueSignal,
        slot_reasks: u32,
    ) -> TransitionOutcome {
        let streak = state.fallback_streak + 1;
        let (action, fallback_streak) = if streak >= self.policy.max_fallbacks.max(1) {
            (
                DialogueAction::HandOff {
                    reason: format!("{streak} consecutive turns were not understood"),
                },
                0,
            )
        } else {
            (DialogueAction::CannotUnderstand, streak)
        };

        TransitionOutcome {
            from: state.node.clone().settle(),
            to: DialogueNode::Fallback,
            signal: signal.clone(),
            action,
            slots: BTreeMap::new(),
            slot_reasks,
            fallback_streak,
        }
    }

    fn outcome(
        &self,
        state: &ConversationState,
        signal: &DialogueSignal,
        to: DialogueNode,
        action: DialogueAction,
        slots: BTreeMap<String, String>,
        slot_reasks: u32,
    ) -> TransitionOutcome {
        TransitionOutcome {
            from: state.node.clone().settle(),
            to,
            signal: signal.clone(),
            action,
            slots,
            slot_reasks,
            fallback_streak: 0,
        }
    }

    fn ambiguous_candidates(&self, nlu: &NluResult) -> Option<Vec<String>> {
        if self.policy.ambiguity_margin <= 0.0 {
            return None;
        }
        let top = nlu.matched_intent()?;
        let candidates = nlu
            .ranking
            .iter()
            .filter(|score| {
                score.confidence >= self.policy.confidence_threshold
                    && top.confidence - score.confidence < self.policy.ambiguity_margin
            })
            .map(|score| score.intent.clone())
            .collect::<Vec<_>>();
        (candidates.len() > 1).then_some(candidates)
    }
}

fn ask_for(intent: &str, slot: &SlotDefinition) -> DialogueAction {
    let prompt = if slot.prompt.trim().is_empty() {
        format!("What is the {}?", slot.name.replace('_', " "))
    } else {
        slot.prompt.clone()
    };
    DialogueAction::AskForSlot { intent: intent.to_owned(), slot: slot.name.clone(), prompt }
}

/// Assigns extracted entities to slots of `definition`.
///
/// Slots are visited pending first, then unfilled ones in declared order, then
/// already-filled ones (re-specification, last value wins). Entities are
/// consumed in span order and each one fills at most one slot. A pending
/// free-text slot takes the whole utterance.
pub fn assign_slot_values(
    definition: &IntentDefinition,
    filled: &BTreeMap<String, String>,
    pending: Option<&str>,
    entities: &[Entity],
    text: &str,
    catalog: &IntentCatalog,
) -> BTreeMap<String, String> {
    let mut ordered = entities.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|entity| (entity.raw_span.start, entity.raw_span.end));

    let pending_slot = pending.and_then(|name| definition.slot(name));
    let unfilled = definition
        .slots
        .iter()
        .filter(|slot| Some(slot.name.as_str()) != pending && !filled.contains_key(&slot.name));
    let refilled = definition
        .slots
        .iter()
        .filter(|slot| Some(slot.name.as_str()) != pending && filled.contains_key(&slot.name));
    let visit = pending_slot.into_iter().chain(unfilled).chain(refilled);

    let mut consumed = BTreeSet::new();
    let mut assigned = BTreeMap::new();
    for slot in visit {
        let kind = catalog.entity(&slot.entity_type).map(|entity| entity.kind).unwrap_or_default();
        if kind == EntityKind::FreeText {
            let trimmed = text.trim();
            if Some(slot.name.as_str()) == pending && !trimmed.is_empty() {
                assigned.insert(slot.name.clone(), trimmed.to_owned());
            }
            continue;
        }

        let candidate = ordered.iter().enumerate().find(|(index, entity)| {
            !consumed.contains(index)
                && entity.entity_type == slot.entity_type
                && catalog.entity(&slot.entity_type).map_or(true, |def| def.accepts(&entity.value))
        });
        if let Some((index, entity)) = candidate {
            consumed.insert(index);
            assigned.insert(slot.name.clone(), entity.value.clone());
        }
    }
    assigned
}
