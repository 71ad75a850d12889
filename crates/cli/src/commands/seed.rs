use crate::commands::{async_runtime, load_config, CommandResult, EXIT_RUNTIME_FAILURE};
use parley_core::config::ConfigOverrides;
use parley_db::{connect_with_config, migrations, DemoCatalog};

pub fn run() -> CommandResult {
    let config = match load_config("seed", ConfigOverrides::default()) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match async_runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string()))?;

        migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string()))?;

        let seeded = DemoCatalog::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string()))?;

        let verification = DemoCatalog::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string()))?;

        let outcome = if verification.all_present {
            Ok(seeded)
        } else {
            let failed_checks = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            Err(("seed_verification", verification_message(&failed_checks)))
        };

        pool.close().await;
        outcome
    });

    match result {
        Ok(seeded) => {
            let intents = DemoCatalog::catalog()
                .map(|catalog| catalog.intent_names().join(", "))
                .unwrap_or_default();
            CommandResult::success(
                "seed",
                format!(
                    "demo catalog loaded: {} intents, {} entities\n  intents: {intents}",
                    seeded.intents_seeded, seeded.entities_seeded
                ),
            )
        }
        Err((error_class, message)) => {
            CommandResult::failure("seed", error_class, message, EXIT_RUNTIME_FAILURE)
        }
    }
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some demo catalog rows failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_message;

    #[test]
    fn verification_error_message_targets_failed_checks() {
        assert_eq!(
            verification_message(&["book_flight", "declaration-order"]),
            "seed verification failed for checks: book_flight, declaration-order"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        assert_eq!(verification_message(&[]), "some demo catalog rows failed to load");
    }
}
