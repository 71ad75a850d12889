use async_trait::async_trait;
use thiserror::Error;

use parley_core::domain::conversation::ConversationState;
use parley_core::domain::utterance::ThreadId;

pub mod catalog;
pub mod conversation;
pub mod memory;

pub use catalog::SqlIntentSource;
pub use conversation::SqlConversationStore;
pub use memory::InMemoryConversationStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("version conflict on thread `{thread_id}`: expected {expected}, found {actual}")]
    VersionConflict { thread_id: String, expected: u64, actual: u64 },
    #[error("state for thread `{thread_id}` carries version {actual}, expected {expected_next}")]
    InvalidVersion { thread_id: String, expected_next: u64, actual: u64 },
}

impl RepositoryError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// A saved state must be the direct successor of the version it replaces.
pub(crate) fn ensure_next_version(
    thread_id: &ThreadId,
    state: &ConversationState,
    expected_version: u64,
) -> Result<(), RepositoryError> {
    let expected_next = expected_version.saturating_add(1);
    if state.version != expected_next {
        return Err(RepositoryError::InvalidVersion {
            thread_id: thread_id.to_string(),
            expected_next,
            actual: state.version,
        });
    }
    Ok(())
}

/// Durable per-thread memory guarded by optimistic concurrency.
///
/// `load` never fails for an unknown thread: it returns a fresh state at
/// version 0. `save` succeeds only when the stored version equals
/// `expected_version` (0 meaning "not stored yet") and `state.version` is
/// `expected_version + 1`; the check and the write are a single atomic step.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, thread_id: &ThreadId) -> Result<ConversationState, RepositoryError>;

    async fn save(
        &self,
        thread_id: &ThreadId,
        state: &ConversationState,
        expected_version: u64,
    ) -> Result<(), RepositoryError>;
}
