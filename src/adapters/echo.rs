//! Local echo connection for dry runs.
//!
//! Always configured. Messages are logged instead of posted.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::connection::{
    ActionDescriptor, ActionError, ActionErrorKind, ActionParameter, Connection, ConnectionState, ParamType, Params,
};

/// Default registry name
pub const ECHO: &str = "echo";

const DEFAULT_CHANNEL: &str = "default";

#[derive(Debug, Default)]
pub struct EchoConnection {
    posted: AtomicU64,
    channel: Option<String>,
}

impl EchoConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages posted so far
    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }
}

fn required_str<'a>(params: &'a Params, key: &str) -> Result<&'a str, ActionError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ActionError::new(ActionErrorKind::InvalidParams, format!("'{}' must be a string", key)))
}

#[async_trait]
impl Connection for EchoConnection {
    fn name(&self) -> &str {
        ECHO
    }

    fn list_actions(&self) -> Vec<ActionDescriptor> {
        vec![
            ActionDescriptor::new("post-message", "Log a message as if it was posted")
                .with_param(ActionParameter::required("message", ParamType::String, "Message text"))
                .with_param(ActionParameter::optional("channel", ParamType::String, "Target channel")),
            ActionDescriptor::new("get-balance", "Report a zero balance for an address")
                .with_param(ActionParameter::required("address", ParamType::String, "Wallet address")),
        ]
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Configured
    }

    async fn configure(&mut self, settings: &Params) -> Result<(), ActionError> {
        self.channel = settings.get("channel").and_then(Value::as_str).map(str::to_string);
        Ok(())
    }

    async fn perform_action(&self, action: &str, params: &Params) -> Result<Value, ActionError> {
        match action {
            "post-message" => {
                let message = required_str(params, "message")?;
                let channel = params
                    .get("channel")
                    .and_then(Value::as_str)
                    .or(self.channel.as_deref())
                    .unwrap_or(DEFAULT_CHANNEL);
                let id = self.posted.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::info!(connection = ECHO, channel = %channel, id, "{}", message);
                Ok(json!({"id": id, "channel": channel, "message": message}))
            }
            "get-balance" => {
                let address = required_str(params, "address")?;
                Ok(json!({"address": address, "balance": "0"}))
            }
            other => Err(ActionError::new(
                ActionErrorKind::Unsupported,
                format!("echo has no action '{}'", other),
            )),
        }
    }
}
