use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::decision::DialogueAction;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DialogueNode {
    #[default]
    AwaitingIntent,
    SlotFilling {
        intent: String,
        pending_slot: String,
    },
    Confirming {
        intent: String,
    },
    Executing {
        intent: String,
    },
    Fallback,
}

impl DialogueNode {
    pub fn intent(&self) -> Option<&str> {
        match self {
            Self::SlotFilling { intent, .. }
            | Self::Confirming { intent }
            | Self::Executing { intent } => Some(intent),
            Self::AwaitingIntent | Self::Fallback => None,
        }
    }

    /// Terminal per-turn nodes collapse to `AwaitingIntent` before the next turn.
    pub fn settle(self) -> Self {
        match self {
            Self::Executing { .. } | Self::Fallback => Self::AwaitingIntent,
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executing { .. } | Self::Fallback)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::AwaitingIntent => "AWAITING_INTENT",
            Self::SlotFilling { .. } => "SLOT_FILLING",
            Self::Confirming { .. } => "CONFIRMING",
            Self::Executing { .. } => "EXECUTING",
            Self::Fallback => "FALLBACK",
        }
    }
}

impl fmt::Display for DialogueNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlotFilling { intent, pending_slot } => {
                write!(f, "{}({intent}, {pending_slot})", self.label())
            }
            Self::Confirming { intent } | Self::Executing { intent } => {
                write!(f, "{}({intent})", self.label())
            }
            Self::AwaitingIntent | Self::Fallback => f.write_str(self.label()),
        }
    }
}

/// NLU output interpreted relative to the node the conversation is in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueSignal {
    IntentRecognized { intent: String, slots: BTreeMap<String, String> },
    AmbiguousIntent { candidates: Vec<String> },
    NoIntentMatched,
    SlotValues { values: BTreeMap<String, String> },
    Affirm,
    Deny,
    Unclear,
    Cancel,
}

impl DialogueSignal {
    pub fn label(&self) -> &'static str {
        match self {
            Self::IntentRecognized { .. } => "intent_recognized",
            Self::AmbiguousIntent { .. } => "ambiguous_intent",
            Self::NoIntentMatched => "no_intent_matched",
            Self::SlotValues { .. } => "slot_values",
            Self::Affirm => "affirm",
            Self::Deny => "deny",
            Self::Unclear => "unclear",
            Self::Cancel => "cancel",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: DialogueNode,
    pub to: DialogueNode,
    pub signal: DialogueSignal,
    pub action: DialogueAction,
    /// Filled slots after this transition, before terminal nodes clear them.
    pub slots: BTreeMap<String, String>,
    pub slot_reasks: u32,
    pub fallback_streak: u32,
}
