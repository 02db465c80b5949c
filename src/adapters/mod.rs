//! Built-in connection adapters.
//!
//! Every built-in adapter is registered at startup; an agent's `config`
//! entries then configure the ones it uses.

mod echo;
mod ollama;

pub use echo::{ECHO, EchoConnection};
pub use ollama::{DEFAULT_BASE_URL, OLLAMA, OllamaConnection};

use crate::config::ConnectionSpec;
use crate::connection::{Connection, ConnectionRegistry};
use crate::error::{AgentError, Result};

/// Names of the built-in adapters, in registration order
pub const BUILTIN: &[&str] = &[ECHO, OLLAMA];

/// Create an unconfigured adapter by name.
pub fn create(name: &str) -> Result<Box<dyn Connection>> {
    match name {
        ECHO => Ok(Box::new(EchoConnection::new())),
        OLLAMA => Ok(Box::new(OllamaConnection::new())),
        other => Err(AgentError::Configuration(format!(
            "unknown connection '{}' (available: {})",
            other,
            BUILTIN.join(", ")
        ))),
    }
}

/// Registry holding every built-in adapter.
pub fn builtin_registry() -> ConnectionRegistry {
    let mut registry = ConnectionRegistry::new();
    registry.register_connection(EchoConnection::new());
    registry.register_connection(OllamaConnection::new());
    registry
}

/// Build the registry for an agent and apply its connection settings.
///
/// Unknown connection names are a configuration error. A connection whose
/// settings are rejected stays registered in its error state, so tasks using
/// it are skipped at dispatch time rather than failing the load.
pub async fn build_registry(specs: &[ConnectionSpec]) -> Result<ConnectionRegistry> {
    for spec in specs {
        if !BUILTIN.contains(&spec.name.as_str()) {
            create(&spec.name)?;
        }
    }

    let registry = builtin_registry();
    for spec in specs {
        if let Err(e) = registry.configure(&spec.name, &spec.settings).await {
            tracing::warn!(connection = %spec.name, error = %e, "Connection left unconfigured");
        }
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Params;
    use serde_json::json;

    fn spec(name: &str, settings: &[(&str, &str)]) -> ConnectionSpec {
        ConnectionSpec {
            name: name.to_string(),
            settings: settings
                .iter()
                .map(|(k, v)| (k.to_string(), json!(v)))
                .collect::<Params>(),
        }
    }

    #[test]
    fn test_create_known_and_unknown() {
        assert_eq!(create(ECHO).unwrap().name(), ECHO);
        assert_eq!(create(OLLAMA).unwrap().name(), OLLAMA);
        let err = create("myspace").err().unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_build_registry_configures_connections() {
        let registry = build_registry(&[spec(ECHO, &[]), spec(OLLAMA, &[("model", "llama3.2")])])
            .await
            .unwrap();
        assert_eq!(registry.names(), &[ECHO.to_string(), OLLAMA.to_string()]);
        assert!(registry.is_configured(OLLAMA).await.unwrap());
        assert_eq!(registry.model_providers().await, vec![OLLAMA.to_string()]);
    }

    #[tokio::test]
    async fn test_unconfigured_connection_still_registered() {
        let registry = build_registry(&[spec(OLLAMA, &[])]).await.unwrap();
        assert!(registry.contains(OLLAMA));
        assert!(!registry.is_configured(OLLAMA).await.unwrap());
        assert!(registry.is_configured(ECHO).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_connection_fails_load() {
        let err = build_registry(&[spec("myspace", &[])]).await.unwrap_err();
        assert!(err.is_configuration());
    }
}
