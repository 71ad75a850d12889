use parley_agent::classifier::StatisticalModel;
use parley_agent::featurizer::LanguageModel;
use parley_core::catalog::{IntentSource, TomlIntentSource};
use parley_core::config::{AppConfig, LlmProvider, LoadOptions};
use parley_db::{connect_with_config, ping};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: &[&str] = &[
    "language_model",
    "statistical_model",
    "intent_catalog",
    "llm_readiness",
    "database_connectivity",
];

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_language_model(&config));
            checks.push(check_statistical_model(&config));
            checks.push(check_llm_readiness(&config));
            checks.extend(check_with_runtime(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.extend(DEPENDENT_CHECKS.iter().map(|&name| {
                DoctorCheck::skipped(name, "skipped because configuration did not load")
            }));
        }
    }

    // skipped checks do not fail the report
    let all_pass = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_language_model(config: &AppConfig) -> DoctorCheck {
    match &config.nlu.language_model_path {
        None => DoctorCheck::pass("language_model", "using the built-in English lexicon"),
        Some(path) => match LanguageModel::load(path) {
            Ok(_) => DoctorCheck::pass("language_model", format!("loaded `{}`", path.display())),
            Err(error) => DoctorCheck::fail("language_model", error.to_string()),
        },
    }
}

fn check_statistical_model(config: &AppConfig) -> DoctorCheck {
    let Some(path) = &config.nlu.statistical_model_path else {
        return DoctorCheck::pass(
            "statistical_model",
            "no artifact configured, prototypes are fitted from catalog examples",
        );
    };
    match StatisticalModel::load(path) {
        Ok(model) if model.embedding_dim != config.nlu.embedding_dim => DoctorCheck::fail(
            "statistical_model",
            format!(
                "artifact has {} dimensions but nlu.embedding_dim is {}",
                model.embedding_dim, config.nlu.embedding_dim
            ),
        ),
        Ok(model) => DoctorCheck::pass(
            "statistical_model",
            format!("loaded `{}` with {} intents", path.display(), model.centroids.len()),
        ),
        Err(error) => DoctorCheck::fail("statistical_model", error.to_string()),
    }
}

fn check_llm_readiness(config: &AppConfig) -> DoctorCheck {
    if !config.nlu.zero_shot_enabled {
        return DoctorCheck::skipped("llm_readiness", "zero-shot classification is disabled");
    }
    match (config.llm.provider, config.llm.api_key.is_some()) {
        (LlmProvider::OpenAi, false) => {
            DoctorCheck::fail("llm_readiness", "llm.api_key is required for the openai provider")
        }
        (provider, _) => DoctorCheck::pass(
            "llm_readiness",
            format!("{provider:?} model `{}` configured", config.llm.model),
        ),
    }
}

fn check_with_runtime(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let details = format!("failed to initialize async runtime: {error}");
            return vec![
                DoctorCheck::fail("intent_catalog", details.clone()),
                DoctorCheck::fail("database_connectivity", details),
            ];
        }
    };

    runtime.block_on(async {
        let catalog = match &config.nlu.catalog_path {
            Some(path) => match TomlIntentSource::new(path).get_active_intents().await {
                Ok(catalog) => DoctorCheck::pass(
                    "intent_catalog",
                    format!("`{}` declares {} intents", path.display(), catalog.intents().len()),
                ),
                Err(error) => DoctorCheck::fail("intent_catalog", error.to_string()),
            },
            None => DoctorCheck::skipped(
                "intent_catalog",
                "no catalog file configured, the SQL catalog is read at startup",
            ),
        };

        let database = match connect_with_config(&config.database).await {
            Ok(pool) => {
                let check = match ping(&pool).await {
                    Ok(()) => DoctorCheck::pass(
                        "database_connectivity",
                        format!("connected using `{}`", config.database.url),
                    ),
                    Err(error) => DoctorCheck::fail(
                        "database_connectivity",
                        format!("database did not answer: {error}"),
                    ),
                };
                pool.close().await;
                check
            }
            Err(error) => DoctorCheck::fail(
                "database_connectivity",
                format!("failed to connect to database: {error}"),
            ),
        };

        vec![catalog, database]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
