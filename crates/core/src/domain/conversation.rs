use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dialogue::states::DialogueNode;
use crate::domain::decision::DialogueAction;
use crate::domain::utterance::ThreadId;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub text: String,
    pub received_at: DateTime<Utc>,
    pub intent: Option<String>,
    pub action: DialogueAction,
}

/// Durable per-thread memory. The store is the sole writer; every write is
/// guarded by `version`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: ThreadId,
    pub version: u64,
    pub node: DialogueNode,
    pub slots: BTreeMap<String, String>,
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    /// Consecutive slot-filling turns that made no progress.
    #[serde(default)]
    pub slot_reasks: u32,
    /// Consecutive turns that ended in fallback.
    #[serde(default)]
    pub fallback_streak: u32,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<ThreadId>) -> Self {
        Self {
            thread_id: thread_id.into(),
            version: 0,
            node: DialogueNode::AwaitingIntent,
            slots: BTreeMap::new(),
            turns: Vec::new(),
            context: BTreeMap::new(),
            slot_reasks: 0,
            fallback_streak: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.version == 0
    }

    pub fn active_intent(&self) -> Option<&str> {
        self.node.intent()
    }

    /// Appends a turn, dropping the oldest ones beyond `max_turns`.
    pub fn record_turn(&mut self, turn: Turn, max_turns: usize) {
        self.turns.push(turn);
        let max_turns = max_turns.max(1);
        if self.turns.len() > max_turns {
            let overflow = self.turns.len() - max_turns;
            self.turns.drain(..overflow);
        }
    }
}
