use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dialogue::states::DialogueNode;
use crate::domain::conversation::ConversationState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DialogueAction {
    AskForSlot { intent: String, slot: String, prompt: String },
    Confirm { intent: String, slots: BTreeMap<String, String> },
    Execute { intent: String, slots: BTreeMap<String, String> },
    ClarifyAmbiguousIntent { candidates: Vec<String> },
    CannotUnderstand,
    HandOff { reason: String },
    Cancelled { intent: Option<String> },
}

impl DialogueAction {
    pub fn action_key(&self) -> &'static str {
        match self {
            Self::AskForSlot { .. } => "dialogue.ask_for_slot",
            Self::Confirm { .. } => "dialogue.confirm",
            Self::Execute { .. } => "dialogue.execute",
            Self::ClarifyAmbiguousIntent { .. } => "dialogue.clarify_intent",
            Self::CannotUnderstand => "dialogue.cannot_understand",
            Self::HandOff { .. } => "dialogue.hand_off",
            Self::Cancelled { .. } => "dialogue.cancelled",
        }
    }
}

/// What the pipeline returns for one turn: the node entered this turn, the
/// action it emits and the state that was persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DialogueDecision {
    pub node: DialogueNode,
    pub action: DialogueAction,
    pub state: ConversationState,
    /// Rendered user-facing messages, filled in by the runtime.
    #[serde(default)]
    pub messages: Vec<String>,
}
