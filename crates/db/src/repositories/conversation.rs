use chrono::Utc;
use sqlx::Row;

use parley_core::domain::conversation::ConversationState;
use parley_core::domain::utterance::ThreadId;

use super::{ensure_next_version, ConversationStore, RepositoryError};
use crate::DbPool;

/// Conversation state kept as one JSON document per thread. The `version`
/// column carries the compare-and-swap guard.
pub struct SqlConversationStore {
    pool: DbPool,
}

impl SqlConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn stored_version(&self, thread_id: &ThreadId) -> Result<u64, RepositoryError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM conversation_state WHERE thread_id = ?")
                .bind(thread_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        version.map(decode_version).transpose().map(Option::unwrap_or_default)
    }
}

#[async_trait::async_trait]
impl ConversationStore for SqlConversationStore {
    async fn load(&self, thread_id: &ThreadId) -> Result<ConversationState, RepositoryError> {
        let row = sqlx::query(
            "SELECT version, state_json FROM conversation_state WHERE thread_id = ?",
        )
        .bind(thread_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(ConversationState::new(thread_id.clone()));
        };

        let state_json: String = row.try_get("state_json")?;
        let mut state = serde_json::from_str::<ConversationState>(&state_json).map_err(|e| {
            RepositoryError::Decode(format!("invalid state_json for thread `{thread_id}`: {e}"))
        })?;
        state.version = decode_version(row.try_get("version")?)?;
        Ok(state)
    }

    async fn save(
        &self,
        thread_id: &ThreadId,
        state: &ConversationState,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        ensure_next_version(thread_id, state, expected_version)?;
        let state_json = serde_json::to_string(state)
            .map_err(|e| RepositoryError::Decode(format!("could not encode state: {e}")))?;
        let version = encode_version(state.version)?;
        let expected = encode_version(expected_version)?;
        let now = Utc::now().to_rfc3339();
        let node = state.node.label();

        let result = if expected_version == 0 {
            sqlx::query(
                r#"
                INSERT INTO conversation_state (
                    thread_id, version, node, state_json, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(thread_id) DO NOTHING
                "#,
            )
            .bind(thread_id.as_str())
            .bind(version)
            .bind(node)
            .bind(&state_json)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE conversation_state
                SET version = ?, node = ?, state_json = ?, updated_at = ?
                WHERE thread_id = ? AND version = ? AND version + 1 = ?
                "#,
            )
            .bind(version)
            .bind(node)
            .bind(&state_json)
            .bind(&now)
            .bind(thread_id.as_str())
            .bind(expected)
            .bind(version)
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            let actual = self.stored_version(thread_id).await?;
            return Err(RepositoryError::VersionConflict {
                thread_id: thread_id.to_string(),
                expected: expected_version,
                actual,
            });
        }

        Ok(())
    }
}

fn encode_version(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version)
        .map_err(|_| RepositoryError::Decode(format!("version {version} exceeds storage range")))
}

fn decode_version(version: i64) -> Result<u64, RepositoryError> {
    u64::try_from(version)
        .map_err(|_| RepositoryError::Decode(format!("negative version in storage: {version}")))
}
