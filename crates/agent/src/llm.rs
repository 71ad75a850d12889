use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use parley_core::config::{LlmConfig, LlmProvider};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Text-completion capability used by the zero-shot classifier. Responses
/// are untrusted and parsed by the caller.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: OPENAI_BASE_URL.to_string(),
            model: model.into(),
            temperature: 0.0,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("openai request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("openai api error {status}: {body}"));
        }

        #[derive(Deserialize)]
        struct Message {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        let parsed: ChatResponse = response.json().await.context("openai response body")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("openai returned no content"))
    }
}

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaClient {
    pub fn new(base_url: Option<&str>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.unwrap_or(OLLAMA_BASE_URL).trim_end_matches('/').to_string(),
            model: model.into(),
            temperature,
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": &self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": {"temperature": self.temperature},
        });

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .context("ollama request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("ollama api error {status}: {body}"));
        }

        #[derive(Deserialize)]
        struct GenerateResponse {
            response: String,
        }

        let parsed: GenerateResponse = response.json().await.context("ollama response body")?;
        Ok(parsed.response)
    }
}

/// Builds the configured client. The HTTP client itself carries no timeout;
/// the classifier bounds each call.
pub fn client_from_config(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider {
        LlmProvider::OpenAi => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| anyhow!("llm.api_key is required for the openai provider"))?;
            let mut client =
                OpenAiClient::new(api_key, &config.model).with_temperature(config.temperature);
            if let Some(base_url) = &config.base_url {
                client = client.with_base_url(base_url);
            }
            Ok(Arc::new(client))
        }
        LlmProvider::Ollama => Ok(Arc::new(OllamaClient::new(
            config.base_url.as_deref(),
            &config.model,
            config.temperature,
        ))),
    }
}

pub fn call_timeout(config: &LlmConfig) -> Duration {
    Duration::from_secs(config.timeout_secs.max(1))
}
