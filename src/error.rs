//! Error types for agentloop
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::connection::ActionError;

/// All error types that can occur in agentloop
#[derive(Debug, Error)]
pub enum AgentError {
    /// Connection not registered
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// Action not exposed by the connection
    #[error("Action not found: {connection}.{action}")]
    ActionNotFound { connection: String, action: String },

    /// Task not present in the active task table
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Invalid agent, task or engine configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Task parameters rejected by the action's schema
    #[error("Validation failed for task '{task}': {}", .errors.join("; "))]
    Validation { task: String, errors: Vec<String> },

    /// Transient action failure that exhausted its retries
    #[error("Transient action error after {attempts} attempt(s): {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: ActionError,
    },

    /// Action failure that must not be retried
    #[error("Permanent action error: {0}")]
    Permanent(#[source] ActionError),

    /// Engine invariant violated; the loop must halt
    #[error("Engine fatal error: {0}")]
    EngineFatal(String),

    /// Invalid runtime operation (e.g. starting a loop twice)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AgentError {
    /// Errors caused by configuration rather than the external platform.
    ///
    /// At load time these are fatal; inside the loop they skip the task.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AgentError::ConnectionNotFound(_)
                | AgentError::ActionNotFound { .. }
                | AgentError::TaskNotFound(_)
                | AgentError::Configuration(_)
                | AgentError::Validation { .. }
        )
    }

    /// Errors that must stop the loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::EngineFatal(_))
    }

    /// Short kind label used in logs and status output.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::ConnectionNotFound(_)
            | AgentError::ActionNotFound { .. }
            | AgentError::TaskNotFound(_)
            | AgentError::Configuration(_)
            | AgentError::Validation { .. } => "configuration",
            AgentError::Transient { .. } => "transient",
            AgentError::Permanent(_) => "permanent",
            AgentError::EngineFatal(_) => "fatal",
            AgentError::InvalidState(_) => "invalid-state",
            AgentError::Io(_) => "io",
            AgentError::Json(_) => "json",
            AgentError::Yaml(_) => "yaml",
        }
    }
}

/// Result type alias for agentloop operations
pub type Result<T> = std::result::Result<T, AgentError>;
