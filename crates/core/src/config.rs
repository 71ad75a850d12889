use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub nlu: NluConfig,
    pub dialogue: DialogueConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    /// Per-call bound for zero-shot classification requests.
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct NluConfig {
    pub confidence_threshold: f32,
    pub ambiguity_margin: f32,
    pub language_model_path: Option<PathBuf>,
    pub statistical_model_path: Option<PathBuf>,
    pub zero_shot_enabled: bool,
    /// TOML catalog; when absent the SQL catalog tables are used.
    pub catalog_path: Option<PathBuf>,
    pub embedding_dim: usize,
    pub ranking_length: usize,
}

#[derive(Clone, Debug)]
pub struct DialogueConfig {
    pub max_turns: usize,
    pub max_slot_reasks: u32,
    pub max_fallbacks: u32,
    pub save_retries: u32,
    pub affirm_intent: String,
    pub deny_intent: String,
    pub cancel_intent: String,
    pub fallback_message: String,
    pub handoff_message: String,
    /// Bound for the outbound call of an API-triggered intent.
    pub api_timeout_secs: u64,
    pub api_failure_message: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub catalog_path: Option<PathBuf>,
    pub confidence_threshold: Option<f32>,
    pub zero_shot_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://parley.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 10,
                max_retries: 1,
                temperature: 0.0,
            },
            nlu: NluConfig {
                confidence_threshold: 0.5,
                ambiguity_margin: 0.0,
                language_model_path: None,
                statistical_model_path: None,
                zero_shot_enabled: false,
                catalog_path: None,
                embedding_dim: 256,
                ranking_length: 3,
            },
            dialogue: DialogueConfig {
                max_turns: 20,
                max_slot_reasks: 3,
                max_fallbacks: 3,
                save_retries: 3,
                affirm_intent: "affirm".to_string(),
                deny_intent: "deny".to_string(),
                cancel_intent: "cancel".to_string(),
                fallback_message: "Sorry, I didn't get that. Could you rephrase?".to_string(),
                handoff_message: "Let me connect you with a human agent.".to_string(),
                api_timeout_secs: 30,
                api_failure_message: "Service is not available. Please try again later."
                    .to_string(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parley.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
        }

        if let Some(nlu) = patch.nlu {
            if let Some(confidence_threshold) = nlu.confidence_threshold {
                self.nlu.confidence_threshold = confidence_threshold;
            }
            if let Some(ambiguity_margin) = nlu.ambiguity_margin {
                self.nlu.ambiguity_margin = ambiguity_margin;
            }
            if let Some(path) = nlu.language_model_path {
                self.nlu.language_model_path = Some(path);
            }
            if let Some(path) = nlu.statistical_model_path {
                self.nlu.statistical_model_path = Some(path);
            }
            if let Some(zero_shot_enabled) = nlu.zero_shot_enabled {
                self.nlu.zero_shot_enabled = zero_shot_enabled;
            }
            if let Some(path) = nlu.catalog_path {
                self.nlu.catalog_path = Some(path);
            }
            if let Some(embedding_dim) = nlu.embedding_dim {
                self.nlu.embedding_dim = embedding_dim;
            }
            if let Some(ranking_length) = nlu.ranking_length {
                self.nlu.ranking_length = ranking_length;
            }
        }

        if let Some(dialogue) = patch.dialogue {
            if let Some(max_turns) = dialogue.max_turns {
                self.dialogue.max_turns = max_turns;
            }
            if let Some(max_slot_reasks) = dialogue.max_slot_reasks {
                self.dialogue.max_slot_reasks = max_slot_reasks;
            }
            if let Some(max_fallbacks) = dialogue.max_fallbacks {
                self.dialogue.max_fallbacks = max_fallbacks;
            }
            if let Some(save_retries) = dialogue.save_retries {
                self.dialogue.save_retries = save_retries;
            }
            if let Some(affirm_intent) = dialogue.affirm_intent {
                self.dialogue.affirm_intent = affirm_intent;
            }
            if let Some(deny_intent) = dialogue.deny_intent {
                self.dialogue.deny_intent = deny_intent;
            }
            if let Some(cancel_intent) = dialogue.cancel_intent {
                self.dialogue.cancel_intent = cancel_intent;
            }
            if let Some(fallback_message) = dialogue.fallback_message {
                self.dialogue.fallback_message = fallback_message;
            }
            if let Some(handoff_message) = dialogue.handoff_message {
                self.dialogue.handoff_message = handoff_message;
            }
            if let Some(api_timeout_secs) = dialogue.api_timeout_secs {
                self.dialogue.api_timeout_secs = api_timeout_secs;
            }
            if let Some(api_failure_message) = dialogue.api_failure_message {
                self.dialogue.api_failure_message = api_failure_message;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PARLEY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PARLEY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PARLEY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("PARLEY_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("PARLEY_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("PARLEY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("PARLEY_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("PARLEY_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("PARLEY_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("PARLEY_LLM_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("PARLEY_NLU_CONFIDENCE_THRESHOLD") {
            self.nlu.confidence_threshold = parse_f32("PARLEY_NLU_CONFIDENCE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("PARLEY_NLU_AMBIGUITY_MARGIN") {
            self.nlu.ambiguity_margin = parse_f32("PARLEY_NLU_AMBIGUITY_MARGIN", &value)?;
        }
        if let Some(value) = read_env("PARLEY_NLU_LANGUAGE_MODEL_PATH") {
            self.nlu.language_model_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("PARLEY_NLU_STATISTICAL_MODEL_PATH") {
            self.nlu.statistical_model_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("PARLEY_NLU_ZERO_SHOT_ENABLED") {
            self.nlu.zero_shot_enabled = parse_bool("PARLEY_NLU_ZERO_SHOT_ENABLED", &value)?;
        }
        if let Some(value) = read_env("PARLEY_NLU_CATALOG_PATH") {
            self.nlu.catalog_path = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("PARLEY_DIALOGUE_MAX_SLOT_REASKS") {
            self.dialogue.max_slot_reasks = parse_u32("PARLEY_DIALOGUE_MAX_SLOT_REASKS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_DIALOGUE_MAX_FALLBACKS") {
            self.dialogue.max_fallbacks = parse_u32("PARLEY_DIALOGUE_MAX_FALLBACKS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_DIALOGUE_SAVE_RETRIES") {
            self.dialogue.save_retries = parse_u32("PARLEY_DIALOGUE_SAVE_RETRIES", &value)?;
        }
        if let Some(value) = read_env("PARLEY_DIALOGUE_API_TIMEOUT_SECS") {
            self.dialogue.api_timeout_secs =
                parse_u64("PARLEY_DIALOGUE_API_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PARLEY_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("PARLEY_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("PARLEY_LOGGING_LEVEL").or_else(|| read_env("PARLEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLEY_LOGGING_FORMAT").or_else(|| read_env("PARLEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(catalog_path) = overrides.catalog_path {
            self.nlu.catalog_path = Some(catalog_path);
        }
        if let Some(confidence_threshold) = overrides.confidence_threshold {
            self.nlu.confidence_threshold = confidence_threshold;
        }
        if let Some(zero_shot_enabled) = overrides.zero_shot_enabled {
            self.nlu.zero_shot_enabled = zero_shot_enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm, self.nlu.zero_shot_enabled)?;
        validate_nlu(&self.nlu)?;
        validate_dialogue(&self.dialogue)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig, zero_shot_enabled: bool) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if !zero_shot_enabled {
        return Ok(());
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider when nlu.zero_shot_enabled is true"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_nlu(nlu: &NluConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&nlu.confidence_threshold) {
        return Err(ConfigError::Validation(
            "nlu.confidence_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&nlu.ambiguity_margin) {
        return Err(ConfigError::Validation(
            "nlu.ambiguity_margin must be in range 0.0..=1.0 (0 disables clarification)"
                .to_string(),
        ));
    }

    if nlu.embedding_dim == 0 || nlu.embedding_dim > 4096 {
        return Err(ConfigError::Validation(
            "nlu.embedding_dim must be in range 1..=4096".to_string(),
        ));
    }

    if nlu.ranking_length == 0 {
        return Err(ConfigError::Validation(
            "nlu.ranking_length must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_dialogue(dialogue: &DialogueConfig) -> Result<(), ConfigError> {
    if dialogue.max_turns == 0 {
        return Err(ConfigError::Validation(
            "dialogue.max_turns must be greater than zero".to_string(),
        ));
    }

    if dialogue.max_fallbacks == 0 {
        return Err(ConfigError::Validation(
            "dialogue.max_fallbacks must be greater than zero".to_string(),
        ));
    }

    if dialogue.save_retries == 0 || dialogue.save_retries > 10 {
        return Err(ConfigError::Validation(
            "dialogue.save_retries must be in range 1..=10".to_string(),
        ));
    }

    if dialogue.api_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "dialogue.api_timeout_secs must be greater than zero".to_string(),
        ));
    }

    let intents = [
        ("dialogue.affirm_intent", &dialogue.affirm_intent),
        ("dialogue.deny_intent", &dialogue.deny_intent),
        ("dialogue.cancel_intent", &dialogue.cancel_intent),
    ];
    for (key, value) in intents {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{key} must not be empty")));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.trim().parse::<f32>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    nlu: Option<NluPatch>,
    dialogue: Option<DialoguePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct NluPatch {
    confidence_threshold: Option<f32>,
    ambiguity_margin: Option<f32>,
    language_model_path: Option<PathBuf>,
    statistical_model_path: Option<PathBuf>,
    zero_shot_enabled: Option<bool>,
    catalog_path: Option<PathBuf>,
    embedding_dim: Option<usize>,
    ranking_length: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct DialoguePatch {
    max_turns: Option<usize>,
    max_slot_reasks: Option<u32>,
    max_fallbacks: Option<u32>,
    save_retries: Option<u32>,
    affirm_intent: Option<String>,
    deny_intent: Option<String>,
    cancel_intent: Option<String>,
    fallback_message: Option<String>,
    handoff_message: Option<String>,
    api_timeout_secs: Option<u64>,
    api_failure_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
