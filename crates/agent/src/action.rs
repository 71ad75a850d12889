use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tera::{Context, Tera};
use thiserror::Error;

use parley_core::domain::intent::{ApiDetails, HttpMethod};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("failed to render api {field} for `{intent}`: {message}")]
    Template { intent: String, field: &'static str, message: String },
    #[error("api request body for `{intent}` is not valid json: {source}")]
    InvalidBody {
        intent: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("api call failed: {0}")]
    Transport(String),
    #[error("api call timed out after {0:?}")]
    Timeout(Duration),
    #[error("api returned status {0}")]
    Status(u16),
    #[error("api response is not json: {0}")]
    MalformedResponse(String),
}

/// Fully rendered outbound call for one executed intent.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub parameters: Value,
    pub is_json: bool,
}

impl ActionRequest {
    /// Renders `details` against the executing intent. The URL and the JSON
    /// body see `intent`, `slots` and `context`; without a JSON body the
    /// slots themselves are sent as parameters.
    pub fn render(
        details: &ApiDetails,
        intent: &str,
        slots: &BTreeMap<String, String>,
        context: &BTreeMap<String, Value>,
    ) -> Result<Self, ActionError> {
        let mut tera_context = Context::new();
        tera_context.insert("intent", intent);
        tera_context.insert("slots", slots);
        tera_context.insert("context", context);

        let url = render_field(&details.url, &tera_context, intent, "url")?;
        let parameters = match (&details.json_body, details.is_json) {
            (Some(body), true) => {
                let rendered = render_field(body, &tera_context, intent, "body")?;
                serde_json::from_str(&rendered).map_err(|source| ActionError::InvalidBody {
                    intent: intent.to_string(),
                    source,
                })?
            }
            _ => Value::Object(
                slots
                    .iter()
                    .map(|(name, value)| (name.clone(), Value::from(value.as_str())))
                    .collect(),
            ),
        };

        Ok(Self {
            method: details.method,
            url,
            headers: details.headers.clone(),
            parameters,
            is_json: details.is_json,
        })
    }
}

fn render_field(
    template: &str,
    context: &Context,
    intent: &str,
    field: &'static str,
) -> Result<String, ActionError> {
    if !template.contains("{{") && !template.contains("{%") {
        return Ok(template.to_string());
    }
    Tera::one_off(template, context, false).map_err(|error| ActionError::Template {
        intent: intent.to_string(),
        field,
        message: error.to_string(),
    })
}

/// Performs the outbound call of an API-triggered intent and returns the
/// decoded JSON reply.
#[async_trait]
pub trait ActionClient: Send + Sync {
    async fn call(&self, request: &ActionRequest) -> Result<Value, ActionError>;
}

pub struct HttpActionClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpActionClient {
    pub fn new(timeout: Duration) -> Self {
        Self { http: reqwest::Client::new(), timeout }
    }
}

#[async_trait]
impl ActionClient for HttpActionClient {
    async fn call(&self, request: &ActionRequest) -> Result<Value, ActionError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(&request.url),
            HttpMethod::Post => self.http.post(&request.url),
            HttpMethod::Put => self.http.put(&request.url),
            HttpMethod::Delete => self.http.delete(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = if request.method.has_body() && request.is_json {
            builder.json(&request.parameters)
        } else {
            builder.query(&request.parameters)
        };

        let response = builder.timeout(self.timeout).send().await.map_err(|error| {
            if error.is_timeout() {
                ActionError::Timeout(self.timeout)
            } else {
                ActionError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ActionError::Status(status.as_u16()));
        }
        response.json::<Value>().await.map_err(|error| {
            if error.is_timeout() {
                ActionError::Timeout(self.timeout)
            } else {
                ActionError::MalformedResponse(error.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use serde_json::json;

    use parley_core::domain::intent::{ApiDetails, HttpMethod};

    use super::{ActionClient, ActionError, ActionRequest, HttpActionClient};

    fn slots() -> BTreeMap<String, String> {
        BTreeMap::from([("order_id".to_string(), "A-17".to_string())])
    }

    fn context() -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([("customer".to_string(), json!("c-9"))])
    }

    #[test]
    fn url_and_json_body_are_rendered_from_slots_and_context() {
        let mut details = ApiDetails::new(
            HttpMethod::Post,
            "https://shop.example/{{ context.customer }}/orders/{{ slots.order_id }}",
        );
        details.is_json = true;
        details.json_body =
            Some(r#"{"order": "{{ slots.order_id }}", "intent": "{{ intent }}"}"#.to_string());

        let request =
            ActionRequest::render(&details, "order_status", &slots(), &context()).expect("render");

        assert_eq!(request.url, "https://shop.example/c-9/orders/A-17");
        assert_eq!(request.parameters, json!({"order": "A-17", "intent": "order_status"}));
        assert_eq!(request.method, HttpMethod::Post);
    }

    #[test]
    fn slots_are_the_parameters_without_a_json_body() {
        let details = ApiDetails::new(HttpMethod::Get, "https://shop.example/orders");
        let request =
            ActionRequest::render(&details, "order_status", &slots(), &context()).expect("render");

        assert_eq!(request.parameters, json!({"order_id": "A-17"}));
        assert!(!request.is_json);
    }

    #[test]
    fn body_that_does_not_render_to_json_is_rejected() {
        let mut details = ApiDetails::new(HttpMethod::Post, "https://shop.example/orders");
        details.is_json = true;
        details.json_body = Some("order={{ slots.order_id }}".to_string());

        let error = ActionRequest::render(&details, "order_status", &slots(), &context())
            .expect_err("not json");
        assert!(matches!(
            error,
            ActionError::InvalidBody { ref intent, .. } if intent == "order_status"
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let client = HttpActionClient::new(Duration::from_secs(2));
        let request = ActionRequest {
            method: HttpMethod::Get,
            url: "http://127.0.0.1:9/orders".to_string(),
            headers: BTreeMap::new(),
            parameters: json!({}),
            is_json: false,
        };

        let error = client.call(&request).await.expect_err("nothing listens on the discard port");
        assert!(matches!(error, ActionError::Transport(_) | ActionError::Timeout(_)));
    }
}
