use std::collections::HashMap;

use tokio::sync::RwLock;

use parley_core::domain::conversation::ConversationState;
use parley_core::domain::utterance::ThreadId;

use super::{ensure_next_version, ConversationStore, RepositoryError};

#[derive(Default)]
pub struct InMemoryConversationStore {
    states: RwLock<HashMap<ThreadId, ConversationState>>,
}

impl InMemoryConversationStore {
    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, thread_id: &ThreadId) -> Result<ConversationState, RepositoryError> {
        let states = self.states.read().await;
        Ok(states
            .get(thread_id)
            .cloned()
            .unwrap_or_else(|| ConversationState::new(thread_id.clone())))
    }

    async fn save(
        &self,
        thread_id: &ThreadId,
        state: &ConversationState,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        ensure_next_version(thread_id, state, expected_version)?;
        let mut states = self.states.write().await;
        let actual = states.get(thread_id).map(|stored| stored.version).unwrap_or(0);
        if actual != expected_version {
            return Err(RepositoryError::VersionConflict {
                thread_id: thread_id.to_string(),
                expected: expected_version,
                actual,
            });
        }
        states.insert(thread_id.clone(), state.clone());
        Ok(())
    }
}
