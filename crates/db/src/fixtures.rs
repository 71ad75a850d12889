use std::path::Path;

use parley_core::catalog::{IntentCatalog, TomlIntentSource};

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, SqlIntentSource};

/// Intents the demo catalog must provide, in declaration order.
const DEMO_INTENTS: &[&str] =
    &["greet", "book_flight", "check_booking", "leave_feedback", "affirm", "deny", "cancel"];

const DEMO_ENTITIES: &[&str] = &["city", "travel_date", "booking_ref"];

/// Travel-assistant catalog used by `parley seed` and the chat demo.
pub struct DemoCatalog;

impl DemoCatalog {
    pub const TOML: &str = include_str!("../../../config/catalog.toml");

    pub fn catalog() -> Result<IntentCatalog, RepositoryError> {
        TomlIntentSource::parse(Self::TOML, Path::new("config/catalog.toml"))
            .map_err(|error| RepositoryError::Decode(error.to_string()))
    }

    /// Writes the demo catalog into the admin tables. Re-running is idempotent.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let catalog = Self::catalog()?;
        let source = SqlIntentSource::new(pool.clone());

        for entity in catalog.entities() {
            source.save_entity(entity).await?;
        }
        for (position, intent) in catalog.intents().iter().enumerate() {
            let position = i64::try_from(position)
                .map_err(|_| RepositoryError::Decode("catalog too large".to_string()))?;
            source.save_intent(intent, position).await?;
        }

        Ok(SeedResult {
            intents_seeded: catalog.intents().len(),
            entities_seeded: catalog.entities().len(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for intent in DEMO_INTENTS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM intent_definition WHERE name = ?1 AND active = 1)",
            )
            .bind(*intent)
            .fetch_one(pool)
            .await?;
            checks.push((*intent, present == 1));
        }

        for entity in DEMO_ENTITIES {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM entity_definition WHERE name = ?1)",
            )
            .bind(*entity)
            .fetch_one(pool)
            .await?;
            checks.push((*entity, present == 1));
        }

        let ordered: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM intent_definition WHERE active = 1 ORDER BY position",
        )
        .fetch_all(pool)
        .await?;
        let declared = ordered
            .iter()
            .map(String::as_str)
            .filter(|name| DEMO_INTENTS.contains(name))
            .collect::<Vec<_>>();
        checks.push(("declaration-order", declared == DEMO_INTENTS));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        for intent in DEMO_INTENTS {
            sqlx::query("DELETE FROM intent_definition WHERE name = ?1")
                .bind(*intent)
                .execute(&mut *tx)
                .await?;
        }
        for entity in DEMO_ENTITIES {
            sqlx::query("DELETE FROM entity_definition WHERE name = ?1")
                .bind(*entity)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub intents_seeded: usize,
    pub entities_seeded: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
