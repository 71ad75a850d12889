use crate::commands::{async_runtime, load_config, CommandResult, EXIT_RUNTIME_FAILURE};
use parley_core::config::ConfigOverrides;
use parley_db::{connect_with_config, migrations};

pub fn run() -> CommandResult {
    let config = match load_config("migrate", ConfigOverrides::default()) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match async_runtime("migrate") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string()))?;
        migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string()))?;
        pool.close().await;
        Ok::<(), (&'static str, String)>(())
    });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err((error_class, message)) => {
            CommandResult::failure("migrate", error_class, message, EXIT_RUNTIME_FAILURE)
        }
    }
}
