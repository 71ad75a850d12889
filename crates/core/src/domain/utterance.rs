use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ThreadId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Channel-supplied metadata. `context` is merged into the persisted
/// conversation context on every turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub channel: String,
    pub sender_id: Option<String>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub thread_id: ThreadId,
    pub text: String,
    pub received_at: DateTime<Utc>,
    pub channel: Option<ChannelMetadata>,
}

impl Utterance {
    pub fn new(thread_id: impl Into<ThreadId>, text: impl Into<String>) -> Self {
        Self { thread_id: thread_id.into(), text: text.into(), received_at: Utc::now(), channel: None }
    }

    pub fn with_channel(mut self, channel: ChannelMetadata) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Name of the intent addressed by a `/intent_name` trigger, if any.
    pub fn direct_intent(&self) -> Option<&str> {
        let command = self.text.trim().strip_prefix('/')?;
        let name = command.split_whitespace().next()?;
        (!name.is_empty()).then_some(name)
    }
}
