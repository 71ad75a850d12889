use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use parley_core::catalog::{CatalogError, IntentCatalog, IntentSource};
use parley_core::domain::intent::{
    ApiDetails, EntityDefinition, EntityKind, IntentDefinition, SlotDefinition,
};

use super::RepositoryError;
use crate::DbPool;

/// Active intent set read from the admin tables. Intents are ordered by
/// `position`, which is the declaration order used for score tie-breaks.
pub struct SqlIntentSource {
    pool: DbPool,
}

impl SqlIntentSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save_entity(&self, entity: &EntityDefinition) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO entity_definition (
                name, kind, patterns_json, synonyms_json, ner_labels_json, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                kind = excluded.kind,
                patterns_json = excluded.patterns_json,
                synonyms_json = excluded.synonyms_json,
                ner_labels_json = excluded.ner_labels_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entity.name)
        .bind(kind_to_str(entity.kind))
        .bind(encode_json(&entity.patterns)?)
        .bind(encode_json(&entity.synonyms)?)
        .bind(encode_json(&entity.ner_labels)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_intent(
        &self,
        intent: &IntentDefinition,
        position: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO intent_definition (
                name, position, active, examples_json, slots_json, requires_confirmation,
                confirmation_template, response_template, api_trigger, api_details_json,
                updated_at
            ) VALUES (?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                position = excluded.position,
                active = 1,
                examples_json = excluded.examples_json,
                slots_json = excluded.slots_json,
                requires_confirmation = excluded.requires_confirmation,
                confirmation_template = excluded.confirmation_template,
                response_template = excluded.response_template,
                api_trigger = excluded.api_trigger,
                api_details_json = excluded.api_details_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&intent.name)
        .bind(position)
        .bind(encode_json(&intent.examples)?)
        .bind(encode_json(&intent.slots)?)
        .bind(intent.requires_confirmation)
        .bind(&intent.confirmation_template)
        .bind(&intent.response_template)
        .bind(intent.api_trigger)
        .bind(intent.api_details.as_ref().map(encode_json).transpose()?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_active(&self, name: &str, active: bool) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("UPDATE intent_definition SET active = ?, updated_at = ? WHERE name = ?")
                .bind(active)
                .bind(Utc::now().to_rfc3339())
                .bind(name)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn load_catalog(
        &self,
    ) -> Result<(Vec<IntentDefinition>, Vec<EntityDefinition>), RepositoryError> {
        let entity_rows = sqlx::query(
            r#"
            SELECT name, kind, patterns_json, synonyms_json, ner_labels_json
            FROM entity_definition
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let entities =
            entity_rows.iter().map(entity_from_row).collect::<Result<Vec<_>, _>>()?;

        let intent_rows = sqlx::query(
            r#"
            SELECT
                name, examples_json, slots_json, requires_confirmation,
                confirmation_template, response_template, api_trigger, api_details_json
            FROM intent_definition
            WHERE active = 1
            ORDER BY position, name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let intents = intent_rows.iter().map(intent_from_row).collect::<Result<Vec<_>, _>>()?;

        Ok((intents, entities))
    }
}

#[async_trait]
impl IntentSource for SqlIntentSource {
    async fn get_active_intents(&self) -> Result<IntentCatalog, CatalogError> {
        let (intents, entities) =
            self.load_catalog().await.map_err(|error| CatalogError::Source(error.to_string()))?;
        IntentCatalog::new(intents, entities)
    }
}

fn entity_from_row(row: &SqliteRow) -> Result<EntityDefinition, RepositoryError> {
    let name: String = row.try_get("name")?;
    let kind: String = row.try_get("kind")?;

    Ok(EntityDefinition {
        kind: kind_from_str(&kind)
            .ok_or_else(|| RepositoryError::Decode(format!("invalid entity kind: {kind}")))?,
        patterns: decode_json("patterns_json", row)?,
        synonyms: decode_json::<BTreeMap<String, Vec<String>>>("synonyms_json", row)?,
        ner_labels: decode_json("ner_labels_json", row)?,
        name,
    })
}

fn intent_from_row(row: &SqliteRow) -> Result<IntentDefinition, RepositoryError> {
    let api_details = row
        .try_get::<Option<String>, _>("api_details_json")?
        .map(|raw| {
            serde_json::from_str::<ApiDetails>(&raw).map_err(|e| {
                RepositoryError::Decode(format!("invalid json in `api_details_json`: {e}"))
            })
        })
        .transpose()?;

    Ok(IntentDefinition {
        name: row.try_get("name")?,
        examples: decode_json("examples_json", row)?,
        slots: decode_json::<Vec<SlotDefinition>>("slots_json", row)?,
        requires_confirmation: row.try_get("requires_confirmation")?,
        confirmation_template: row.try_get("confirmation_template")?,
        response_template: row.try_get("response_template")?,
        api_trigger: row.try_get("api_trigger")?,
        api_details,
    })
}

fn kind_to_str(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Text => "text",
        EntityKind::Number => "number",
        EntityKind::FreeText => "free_text",
    }
}

fn kind_from_str(value: &str) -> Option<EntityKind> {
    match value {
        "text" => Some(EntityKind::Text),
        "number" => Some(EntityKind::Number),
        "free_text" => Some(EntityKind::FreeText),
        _ => None,
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Decode(format!("encode failed: {e}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    row: &SqliteRow,
) -> Result<T, RepositoryError> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw)
        .map_err(|e| RepositoryError::Decode(format!("invalid json in `{column}`: {e}")))
}
