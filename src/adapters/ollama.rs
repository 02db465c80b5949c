//! Ollama connection
//!
//! Text generation against a local Ollama server over its HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use crate::connection::{
    ActionDescriptor, ActionError, ActionErrorKind, ActionParameter, Connection, ConnectionState, ParamType, Params,
};

/// Default registry name
pub const OLLAMA: &str = "ollama";

/// Default Ollama server URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Wait suggested when a 429 carries no usable Retry-After header
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

pub struct OllamaConnection {
    client: Client,
    base_url: Option<String>,
    model: Option<String>,
    state: ConnectionState,
}

impl Default for OllamaConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaConnection {
    /// Create an unconfigured connection
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: None,
            model: None,
            state: ConnectionState::Unconfigured,
        }
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    async fn generate(&self, params: &Params) -> Result<Value, ActionError> {
        let (Some(base_url), Some(default_model)) = (self.base_url.as_deref(), self.model.as_deref()) else {
            return Err(ActionError::new(
                ActionErrorKind::InvalidCredentials,
                "ollama is not configured",
            ));
        };

        let prompt = params
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::new(ActionErrorKind::InvalidParams, "'prompt' must be a string"))?;
        let model = params.get("model").and_then(Value::as_str).unwrap_or(default_model);

        let mut body = json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
        });
        if let Some(system) = params.get("system_prompt").and_then(Value::as_str) {
            body["system"] = json!(system);
        }

        let url = format!("{}/api/generate", base_url.trim_end_matches('/'));
        tracing::debug!(connection = OLLAMA, model = %model, url = %url, "Generating text");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let error_body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(status, retry_after, &error_body));
        }

        let payload: Value = response.json().await.map_err(request_error)?;
        let text = payload
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::new(ActionErrorKind::Unavailable, "response missing 'response' field"))?;

        Ok(json!({"model": model, "text": text}))
    }
}

/// Classify a transport-level failure.
fn request_error(e: reqwest::Error) -> ActionError {
    if e.is_timeout() {
        ActionError::new(ActionErrorKind::Timeout, e.to_string())
    } else if e.is_decode() {
        ActionError::new(ActionErrorKind::Unavailable, format!("invalid response: {}", e))
    } else {
        ActionError::new(ActionErrorKind::Network, e.to_string())
    }
}

/// Classify a non-success HTTP status.
fn status_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ActionError {
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            ActionError::rate_limited(message, Some(retry_after.unwrap_or(DEFAULT_RETRY_AFTER)))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ActionError::new(ActionErrorKind::InvalidCredentials, message)
        }
        StatusCode::REQUEST_TIMEOUT => ActionError::new(ActionErrorKind::Timeout, message),
        s if s.is_server_error() => ActionError::new(ActionErrorKind::Unavailable, message),
        _ => ActionError::new(ActionErrorKind::Rejected, message),
    }
}

#[async_trait]
impl Connection for OllamaConnection {
    fn name(&self) -> &str {
        OLLAMA
    }

    fn list_actions(&self) -> Vec<ActionDescriptor> {
        vec![
            ActionDescriptor::new("generate-text", "Generate text with the configured model")
                .with_param(ActionParameter::required("prompt", ParamType::String, "Prompt text"))
                .with_param(ActionParameter::optional(
                    "system_prompt",
                    ParamType::String,
                    "System prompt",
                ))
                .with_param(ActionParameter::optional(
                    "model",
                    ParamType::String,
                    "Model overriding the configured one",
                )),
        ]
    }

    fn state(&self) -> ConnectionState {
        self.state.clone()
    }

    fn is_llm_provider(&self) -> bool {
        true
    }

    /// Settings: `model` (required), `base_url`, `timeout_secs`.
    async fn configure(&mut self, settings: &Params) -> Result<(), ActionError> {
        let Some(model) = settings.get("model").and_then(Value::as_str).filter(|m| !m.is_empty()) else {
            self.state = ConnectionState::Error("model not set".to_string());
            return Err(ActionError::new(ActionErrorKind::InvalidParams, "'model' is required"));
        };
        let base_url = settings
            .get("base_url")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_BASE_URL);
        let timeout = settings
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            self.state = ConnectionState::Error(e.to_string());
            ActionError::new(ActionErrorKind::InvalidParams, format!("failed to build HTTP client: {}", e))
        })?;

        self.client = client;
        self.base_url = Some(base_url.to_string());
        self.model = Some(model.to_string());
        self.state = ConnectionState::Configured;
        Ok(())
    }

    async fn perform_action(&self, action: &str, params: &Params) -> Result<Value, ActionError> {
        match action {
            "generate-text" => self.generate(params).await,
            other => Err(ActionError::new(
                ActionErrorKind::Unsupported,
                format!("ollama has no action '{}'", other),
            )),
        }
    }
}
