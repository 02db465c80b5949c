//! Agent descriptor.
//!
//! One JSON file per agent, usually `agents/<name>.json`. Fields the engine
//! does not consume (bio, traits, examples, ...) are ignored.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::Params;
use crate::error::{AgentError, Result};
use crate::tasks::{
    Composition, HourWindow, MultiplierPolicy, MultiplierRule, Task, TaskTarget, TimeWindow, builtin_rules,
    parse_weekdays,
};

/// Fields every descriptor must carry.
pub const REQUIRED_FIELDS: &[&str] = &["name", "loop_delay", "config", "tasks"];

/// Parsed agent descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,

    /// Seconds between iterations.
    pub loop_delay: f64,

    /// Upper bound of the random extra delay in seconds.
    #[serde(default)]
    pub loop_jitter: f64,

    /// Connection settings, one entry per connection.
    pub config: Vec<ConnectionSpec>,

    pub tasks: Vec<TaskSpec>,

    #[serde(default)]
    pub use_time_based_weights: bool,

    /// Factor overrides keyed by rule name.
    #[serde(default)]
    pub time_based_multipliers: BTreeMap<String, f64>,

    /// Extra rules appended after the built-in ones.
    #[serde(default)]
    pub multiplier_rules: Vec<MultiplierRuleSpec>,
}

/// Settings for one connection. `name` selects the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub name: String,
    #[serde(flatten)]
    pub settings: Params,
}

/// Task entry in a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub weight: f64,
    pub connection: String,
    /// Defaults to the task name.
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub params: Params,
}

impl TaskSpec {
    pub fn to_task(&self) -> Task {
        let action = self.action.clone().unwrap_or_else(|| self.name.clone());
        Task {
            name: self.name.clone(),
            weight: self.weight,
            target: TaskTarget::new(self.connection.clone(), action),
            params: self.params.clone(),
        }
    }
}

/// Multiplier rule entry in a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiplierRuleSpec {
    pub name: String,
    /// Glob patterns over task names.
    pub tasks: Vec<String>,
    #[serde(default = "HourWindow::all_day")]
    pub hours: HourWindow,
    #[serde(default)]
    pub days: Vec<String>,
    pub factor: f64,
}

impl MultiplierRuleSpec {
    pub fn to_rule(&self) -> Result<MultiplierRule> {
        let hours = HourWindow::new(self.hours.start, self.hours.end)?;
        let window = TimeWindow::hours(hours).with_days(parse_weekdays(&self.days)?);
        let patterns: Vec<&str> = self.tasks.iter().map(String::as_str).collect();
        MultiplierRule::new(self.name.clone(), &patterns, window, self.factor)
    }
}

impl AgentDescriptor {
    /// Load and validate a descriptor file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| AgentError::Configuration(format!("cannot read agent file {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Parse and validate a descriptor.
    pub fn from_json(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)?;
        let Some(object) = value.as_object() else {
            return Err(AgentError::Configuration("agent descriptor must be a JSON object".to_string()));
        };

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| object.get(*field).is_none_or(Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(AgentError::Configuration(format!(
                "agent descriptor missing required fields: {}",
                missing.join(", ")
            )));
        }

        let descriptor: Self = serde_json::from_value(value)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AgentError::Configuration("agent name cannot be empty".to_string()));
        }
        let delay = self.loop_delay()?;
        let jitter = self.loop_jitter()?;
        if delay.checked_add(jitter).is_none() {
            return Err(AgentError::Configuration(format!(
                "loop_delay {} plus loop_jitter {} is out of range",
                self.loop_delay, self.loop_jitter
            )));
        }
        Ok(())
    }

    pub fn loop_delay(&self) -> Result<Duration> {
        seconds("loop_delay", self.loop_delay)
    }

    pub fn loop_jitter(&self) -> Result<Duration> {
        seconds("loop_jitter", self.loop_jitter)
    }

    /// Tasks as declared, before registry resolution.
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.iter().map(TaskSpec::to_task).collect()
    }

    /// Build the time-based policy.
    ///
    /// Built-in rules come first, then descriptor rules. Overrides in
    /// `time_based_multipliers` replace factors by rule name.
    pub fn policy(&self, composition: Composition) -> Result<MultiplierPolicy> {
        let mut policy = MultiplierPolicy::new(self.use_time_based_weights, composition, builtin_rules());
        for spec in &self.multiplier_rules {
            policy.push_rule(spec.to_rule()?);
        }
        for (name, factor) in &self.time_based_multipliers {
            if !policy.set_factor(name, *factor)? {
                tracing::warn!(agent = %self.name, rule = %name, "Ignoring multiplier for unknown rule");
            }
        }
        Ok(policy)
    }
}

/// Seconds from the descriptor as a `Duration`; negative, non-finite and
/// overflowing values are configuration errors.
fn seconds(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| AgentError::Configuration(format!("invalid {} {}: {}", field, value, e)))
}
