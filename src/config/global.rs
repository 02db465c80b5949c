//! Global configuration.
//!
//! Loaded from ~/.config/agentloop/agentloop.yml or ./agentloop.yml

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::RetryPolicy;
use crate::tasks::Composition;

/// Global configuration for agentloop.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Log level used when RUST_LOG is not set.
    pub log_level: Option<String>,

    /// Directory holding agent descriptors (`<name>.json`).
    pub agents_dir: PathBuf,

    /// Scheduler and dispatcher settings.
    pub engine: EngineConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            agents_dir: PathBuf::from("agents"),
            engine: EngineConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. ~/.config/agentloop/agentloop.yml
    /// 3. agentloop.yml in current directory
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(env!("CARGO_PKG_NAME")).join(format!("{}.yml", env!("CARGO_PKG_NAME")));
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        let local_config = PathBuf::from(format!("{}.yml", env!("CARGO_PKG_NAME")));
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => {
                    log::info!("Loaded config from {}", local_config.display());
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load {}: {}", local_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()
    }

    /// Path of the descriptor for agent `name`.
    pub fn agent_path(&self, name: &str) -> PathBuf {
        let file = Path::new(name);
        if file.extension().is_some_and(|ext| ext == "json") || file.components().count() > 1 {
            file.to_path_buf()
        } else {
            self.agents_dir.join(format!("{}.json", name))
        }
    }
}

/// Scheduler and dispatcher settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Total INVOKE attempts per iteration, including the first.
    pub max_attempts: u32,

    /// Wait before the first retry in milliseconds.
    pub initial_backoff_ms: u64,

    /// Cap on the retry wait in milliseconds.
    pub max_backoff_ms: u64,

    /// Growth factor between retries.
    pub backoff_multiplier: f64,

    /// Bound on a single action call in milliseconds.
    pub invoke_timeout_ms: u64,

    /// Consecutive failures after which a task is soft-disabled.
    pub failure_threshold: Option<u32>,

    /// Seconds after the last failure before a soft-disabled task is probed again.
    pub failure_cooldown_secs: Option<u64>,

    /// Reject the whole agent when any task fails load validation.
    pub strict_tasks: bool,

    /// How matching multiplier rules combine.
    pub composition: Composition,

    /// Fixed RNG seed for reproducible selection.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            invoke_timeout_ms: 60_000, // 1 minute
            failure_threshold: Some(5),
            failure_cooldown_secs: None,
            strict_tasks: true,
            composition: Composition::Multiply,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            eyre::bail!("engine.max_attempts must be > 0");
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier > 0.0) {
            eyre::bail!("engine.backoff_multiplier must be > 0");
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            eyre::bail!("engine.initial_backoff_ms must not exceed engine.max_backoff_ms");
        }
        if self.invoke_timeout_ms == 0 {
            eyre::bail!("engine.invoke_timeout_ms must be > 0");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.backoff_multiplier,
        )
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }

    pub fn failure_cooldown(&self) -> Option<Duration> {
        self.failure_cooldown_secs.map(Duration::from_secs)
    }

    /// Threshold with `0` treated as disabled.
    pub fn failure_threshold(&self) -> Option<u32> {
        self.failure_threshold.filter(|&n| n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = GlobalConfig::default();
        assert_eq!(config.engine.max_attempts, 3);
        assert_eq!(config.engine.failure_threshold, Some(5));
        assert!(config.engine.strict_tasks);
        assert_eq!(config.agents_dir, PathBuf::from("agents"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
engine:
  max_attempts: 5
  composition: override
  seed: 42
"#;
        let config: GlobalConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.engine.max_attempts, 5);
        assert_eq!(config.engine.composition, Composition::Override);
        assert_eq!(config.engine.seed, Some(42));
        // Other fields should have defaults
        assert_eq!(config.engine.max_backoff_ms, 30_000);
        assert_eq!(config.agents_dir, PathBuf::from("agents"));
    }

    #[test]
    fn test_invalid_engine_config() {
        let zero_attempts = EngineConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(zero_attempts.validate().is_err());

        let bad_multiplier = EngineConfig {
            backoff_multiplier: 0.0,
            ..Default::default()
        };
        assert!(bad_multiplier.validate().is_err());

        let inverted = EngineConfig {
            initial_backoff_ms: 60_000,
            max_backoff_ms: 1_000,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let no_timeout = EngineConfig {
            invoke_timeout_ms: 0,
            ..Default::default()
        };
        assert!(no_timeout.validate().is_err());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = EngineConfig {
            max_attempts: 4,
            initial_backoff_ms: 250,
            ..Default::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_backoff, Duration::from_millis(250));
        assert_eq!(config.invoke_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_threshold_disables() {
        let config = EngineConfig {
            failure_threshold: Some(0),
            ..Default::default()
        };
        assert_eq!(config.failure_threshold(), None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level: debug\nagents_dir: /srv/agents").unwrap();

        let config = GlobalConfig::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.agent_path("example"), PathBuf::from("/srv/agents/example.json"));
    }

    #[test]
    fn test_load_rejects_invalid_engine() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "engine:\n  max_attempts: 0").unwrap();
        assert!(GlobalConfig::load(Some(&file.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_agent_path_accepts_explicit_file() {
        let config = GlobalConfig::default();
        assert_eq!(config.agent_path("custom.json"), PathBuf::from("custom.json"));
        assert_eq!(config.agent_path("agents/x.json"), PathBuf::from("agents/x.json"));
    }
}
