use crate::commands::{async_runtime, load_config, CommandResult, EXIT_RUNTIME_FAILURE};
use parley_agent::DialogueRuntime;
use parley_core::config::ConfigOverrides;
use parley_db::{connect_with_config, migrations, ping};

/// Startup preflight: everything the server does before serving, then exits.
pub fn run() -> CommandResult {
    let config = match load_config("start", ConfigOverrides::default()) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match async_runtime("start") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string()))?;
        ping(&pool).await.map_err(|error| ("db_connectivity", error.to_string()))?;
        migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string()))?;

        let dialogue = DialogueRuntime::bootstrap(&config, pool.clone())
            .await
            .map_err(|error| ("initialization", error.to_string()))?;
        let catalog = dialogue.catalog();
        let summary = format!(
            "preflight passed: catalog generation {} with {} intents, backends [{}]",
            catalog.generation(),
            catalog.intents().len(),
            dialogue.pipeline().ensemble().backend_names().join(", ")
        );

        pool.close().await;
        Ok::<String, (&'static str, String)>(summary)
    });

    match result {
        Ok(summary) => CommandResult::success("start", summary),
        Err((error_class, message)) => {
            CommandResult::failure("start", error_class, message, EXIT_RUNTIME_FAILURE)
        }
    }
}
