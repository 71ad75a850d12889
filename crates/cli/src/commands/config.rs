use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use parley_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in effective_values(&config) {
        let source =
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, Option<&'static str>)> {
    let optional_path = |path: &Option<PathBuf>| {
        path.as_ref().map(|path| path.display().to_string()).unwrap_or_else(|| "<unset>".into())
    };
    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        ("database.url", config.database.url.clone(), Some("PARLEY_DATABASE_URL")),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            Some("PARLEY_DATABASE_MAX_CONNECTIONS"),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            Some("PARLEY_DATABASE_TIMEOUT_SECS"),
        ),
        ("llm.provider", format!("{:?}", config.llm.provider), Some("PARLEY_LLM_PROVIDER")),
        ("llm.model", config.llm.model.clone(), Some("PARLEY_LLM_MODEL")),
        (
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            Some("PARLEY_LLM_BASE_URL"),
        ),
        ("llm.api_key", api_key.to_string(), Some("PARLEY_LLM_API_KEY")),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), Some("PARLEY_LLM_TIMEOUT_SECS")),
        (
            "nlu.confidence_threshold",
            config.nlu.confidence_threshold.to_string(),
            Some("PARLEY_NLU_CONFIDENCE_THRESHOLD"),
        ),
        (
            "nlu.ambiguity_margin",
            config.nlu.ambiguity_margin.to_string(),
            Some("PARLEY_NLU_AMBIGUITY_MARGIN"),
        ),
        (
            "nlu.zero_shot_enabled",
            config.nlu.zero_shot_enabled.to_string(),
            Some("PARLEY_NLU_ZERO_SHOT_ENABLED"),
        ),
        (
            "nlu.catalog_path",
            optional_path(&config.nlu.catalog_path),
            Some("PARLEY_NLU_CATALOG_PATH"),
        ),
        (
            "nlu.language_model_path",
            optional_path(&config.nlu.language_model_path),
            Some("PARLEY_NLU_LANGUAGE_MODEL_PATH"),
        ),
        (
            "nlu.statistical_model_path",
            optional_path(&config.nlu.statistical_model_path),
            Some("PARLEY_NLU_STATISTICAL_MODEL_PATH"),
        ),
        ("nlu.embedding_dim", config.nlu.embedding_dim.to_string(), None),
        (
            "dialogue.max_slot_reasks",
            config.dialogue.max_slot_reasks.to_string(),
            Some("PARLEY_DIALOGUE_MAX_SLOT_REASKS"),
        ),
        (
            "dialogue.max_fallbacks",
            config.dialogue.max_fallbacks.to_string(),
            Some("PARLEY_DIALOGUE_MAX_FALLBACKS"),
        ),
        (
            "dialogue.save_retries",
            config.dialogue.save_retries.to_string(),
            Some("PARLEY_DIALOGUE_SAVE_RETRIES"),
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            Some("PARLEY_SERVER_BIND_ADDRESS"),
        ),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            Some("PARLEY_SERVER_HEALTH_CHECK_PORT"),
        ),
        ("logging.level", config.logging.level.clone(), Some("PARLEY_LOGGING_LEVEL")),
        ("logging.format", format!("{:?}", config.logging.format), Some("PARLEY_LOGGING_FORMAT")),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
