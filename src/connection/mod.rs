//! Connection contract, action catalog and registry.
//!
//! Every external platform is reached through a [`Connection`]. The engine only
//! ever sees this contract: it lists actions, reports whether it is configured,
//! and performs a named action with a parameter map.

mod action;
mod registry;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use action::{ActionDescriptor, ActionParameter, ParamType};
pub use registry::{ConnectionRegistry, ConnectionStatus, SharedConnection};

/// Parameters passed to an action.
pub type Params = Map<String, Value>;

/// Configuration state of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unconfigured,
    Configured,
    /// Last configuration attempt failed
    Error(String),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Unconfigured => write!(f, "not configured"),
            ConnectionState::Configured => write!(f, "configured"),
            ConnectionState::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// Classification of an action failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionErrorKind {
    /// Connection refused/reset, DNS, etc.
    Network,
    /// The call did not finish within its timeout
    Timeout,
    /// Platform asked us to slow down
    RateLimited,
    /// Temporary platform outage (5xx)
    Unavailable,
    /// Credentials missing or rejected
    InvalidCredentials,
    /// Request permanently rejected by the platform
    Rejected,
    /// Parameters refused by the connection itself
    InvalidParams,
    /// Action not supported by this connection
    Unsupported,
}

impl ActionErrorKind {
    /// Whether an error of this kind is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            ActionErrorKind::Network => true,
            ActionErrorKind::Timeout => true,
            ActionErrorKind::RateLimited => true,
            ActionErrorKind::Unavailable => true,
            ActionErrorKind::InvalidCredentials => false,
            ActionErrorKind::Rejected => false,
            ActionErrorKind::InvalidParams => false,
            ActionErrorKind::Unsupported => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionErrorKind::Network => "network",
            ActionErrorKind::Timeout => "timeout",
            ActionErrorKind::RateLimited => "rate-limited",
            ActionErrorKind::Unavailable => "unavailable",
            ActionErrorKind::InvalidCredentials => "invalid-credentials",
            ActionErrorKind::Rejected => "rejected",
            ActionErrorKind::InvalidParams => "invalid-params",
            ActionErrorKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ActionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure returned by [`Connection::perform_action`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ActionError {
    pub kind: ActionErrorKind,
    pub message: String,
    /// Platform-suggested wait before retrying
    pub retry_after: Option<Duration>,
}

impl ActionError {
    pub fn new(kind: ActionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: ActionErrorKind::RateLimited,
            message: message.into(),
            retry_after,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Contract implemented by every platform adapter.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Registry name of this connection (e.g. "twitter", "ollama")
    fn name(&self) -> &str;

    /// Actions this connection exposes, in declaration order
    fn list_actions(&self) -> Vec<ActionDescriptor>;

    /// Current configuration state
    fn state(&self) -> ConnectionState;

    fn is_configured(&self) -> bool {
        self.state() == ConnectionState::Configured
    }

    /// Whether this connection can serve text generation
    fn is_llm_provider(&self) -> bool {
        false
    }

    /// Apply new settings. Called under the registry's exclusive lock.
    async fn configure(&mut self, settings: &Params) -> Result<(), ActionError> {
        let _ = settings;
        Ok(())
    }

    /// Perform a named action with already-validated parameters.
    async fn perform_action(&self, action: &str, params: &Params) -> Result<Value, ActionError>;

    /// Look up one action descriptor by name.
    fn action(&self, name: &str) -> Option<ActionDescriptor> {
        self.list_actions().into_iter().find(|a| a.name == name)
    }
}
