//! Connection registry
//!
//! Maps connection names to adapters. Registration happens once at startup;
//! after that the registry is shared read-only between agents. Each connection
//! sits behind its own `RwLock`: invocations take a read guard, configuration
//! takes the write guard, so reconfiguring never overlaps an in-flight call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{ActionDescriptor, Connection, ConnectionState, Params};
use crate::error::{AgentError, Result};

/// A connection shared between the registry and running loops
pub type SharedConnection = Arc<RwLock<Box<dyn Connection>>>;

/// Name and configuration status of a registered connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub name: String,
    pub configured: bool,
    pub state: ConnectionState,
    pub is_llm_provider: bool,
}

/// Registry of connections, iterated in registration order
#[derive(Default)]
pub struct ConnectionRegistry {
    order: Vec<String>,
    connections: HashMap<String, SharedConnection>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under `name`. Re-registering a name replaces the
    /// previous connection but keeps its position.
    pub fn register(&mut self, name: impl Into<String>, connection: Box<dyn Connection>) {
        let name = name.into();
        if !self.connections.contains_key(&name) {
            self.order.push(name.clone());
        }
        tracing::debug!(connection = %name, "Registered connection");
        self.connections.insert(name, Arc::new(RwLock::new(connection)));
    }

    /// Register a connection under its own name
    pub fn register_connection<C: Connection + 'static>(&mut self, connection: C) {
        let name = connection.name().to_string();
        self.register(name, Box::new(connection));
    }

    /// Get a connection by name
    pub fn get(&self, name: &str) -> Result<SharedConnection> {
        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::ConnectionNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Status of every connection in registration order
    pub async fn list(&self) -> Vec<ConnectionStatus> {
        let mut statuses = Vec::with_capacity(self.order.len());
        for name in &self.order {
            let Some(conn) = self.connections.get(name) else {
                continue;
            };
            let guard = conn.read().await;
            let state = guard.state();
            statuses.push(ConnectionStatus {
                name: name.clone(),
                configured: state == ConnectionState::Configured,
                state,
                is_llm_provider: guard.is_llm_provider(),
            });
        }
        statuses
    }

    /// Actions exposed by a connection
    pub async fn list_actions(&self, name: &str) -> Result<Vec<ActionDescriptor>> {
        let conn = self.get(name)?;
        let guard = conn.read().await;
        Ok(guard.list_actions())
    }

    /// Look up a single action of a connection
    pub async fn action(&self, connection: &str, action: &str) -> Result<ActionDescriptor> {
        let conn = self.get(connection)?;
        let guard = conn.read().await;
        guard.action(action).ok_or_else(|| AgentError::ActionNotFound {
            connection: connection.to_string(),
            action: action.to_string(),
        })
    }

    /// Whether a connection is currently configured
    pub async fn is_configured(&self, name: &str) -> Result<bool> {
        let conn = self.get(name)?;
        let guard = conn.read().await;
        Ok(guard.is_configured())
    }

    /// Reconfigure a connection.
    ///
    /// Holds the connection's write lock for the whole call, waiting for any
    /// in-flight action to finish first.
    pub async fn configure(&self, name: &str, settings: &Params) -> Result<ConnectionState> {
        let conn = self.get(name)?;
        let mut guard = conn.write().await;
        match guard.configure(settings).await {
            Ok(()) => {
                let state = guard.state();
                tracing::info!(connection = %name, state = %state, "Connection configured");
                Ok(state)
            }
            Err(e) => {
                tracing::error!(connection = %name, error = %e, "Connection configuration failed");
                Err(AgentError::Configuration(format!(
                    "failed to configure connection '{}': {}",
                    name, e
                )))
            }
        }
    }

    /// Configured connections that can generate text
    pub async fn model_providers(&self) -> Vec<String> {
        self.list()
            .await
            .into_iter()
            .filter(|s| s.configured && s.is_llm_provider)
            .map(|s| s.name)
            .collect()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.order)
            .finish()
    }
}
