use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use parley_agent::DialogueRuntime;
use parley_db::{ping, DbPool};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    runtime: Arc<DialogueRuntime>,
}

impl HealthState {
    pub fn new(db_pool: DbPool, runtime: Arc<DialogueRuntime>) -> Self {
        Self { db_pool, runtime }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub catalog_generation: u64,
    pub intents: usize,
    pub backends: Vec<String>,
    pub nlu_failures: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub pipeline: PipelineStatus,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn bind(bind_address: &str, port: u16) -> std::io::Result<TcpListener> {
    let address = format!("{bind_address}:{port}");
    let listener = TcpListener::bind(&address).await?;
    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint listening"
    );
    Ok(listener)
}

/// Serves `/health` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: HealthState, shutdown: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    if let Err(error) =
        axum::serve(listener, router(state)).with_graceful_shutdown(shutdown).await
    {
        error!(
            event_name = "system.health.error",
            correlation_id = "health",
            error = %error,
            "health endpoint server terminated unexpectedly"
        );
    }
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let catalog = state.runtime.catalog();
    let pipeline = PipelineStatus {
        catalog_generation: catalog.generation(),
        intents: catalog.intents().len(),
        backends: state
            .runtime
            .pipeline()
            .ensemble()
            .backend_names()
            .iter()
            .map(|name| name.to_string())
            .collect(),
        nlu_failures: state.runtime.nlu_failure_count(),
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        pipeline,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use parley_agent::DialogueRuntime;
    use parley_core::config::AppConfig;
    use parley_db::{connect_with_settings, migrations, DbPool};

    use crate::health::{health, HealthState};

    async fn state() -> (DbPool, HealthState) {
        let mut config = AppConfig::default();
        config.nlu.catalog_path =
            Some(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/catalog.toml"));

        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");
        let runtime = DialogueRuntime::bootstrap(&config, pool.clone()).await.expect("runtime");
        (pool.clone(), HealthState::new(pool, Arc::new(runtime)))
    }

    #[tokio::test]
    async fn health_reports_pipeline_when_database_is_reachable() {
        let (pool, state) = state().await;

        let (status, Json(payload)) = health(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.pipeline.catalog_generation, 1);
        assert_eq!(payload.pipeline.intents, 7);
        assert_eq!(payload.pipeline.nlu_failures, 0);
        assert!(payload.pipeline.backends.iter().any(|name| name == "statistical"));

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let (pool, state) = state().await;
        pool.close().await;

        let (status, Json(payload)) = health(State(state)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.pipeline.catalog_generation, 1);
    }
}
