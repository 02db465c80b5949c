//! Task weight table
//!
//! Tasks are loaded once per agent load and resolved against the connection
//! registry. A task whose target does not resolve never makes it into the
//! active table.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionRegistry, Params};
use crate::error::{AgentError, Result};

/// Connection + action a task dispatches to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTarget {
    pub connection: String,
    pub action: String,
}

impl TaskTarget {
    pub fn new(connection: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            action: action.into(),
        }
    }
}

impl std::fmt::Display for TaskTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.connection, self.action)
    }
}

/// A named, weighted, schedulable unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub weight: f64,
    pub target: TaskTarget,
    #[serde(default)]
    pub params: Params,
}

impl Task {
    pub fn new(name: impl Into<String>, weight: f64, target: TaskTarget) -> Self {
        Self {
            name: name.into(),
            weight,
            target,
            params: Params::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// A task dropped during load, with the reason
#[derive(Debug)]
pub struct RejectedTask {
    pub name: String,
    pub error: AgentError,
}

/// Read-only set of resolved tasks
#[derive(Debug, Clone, Default)]
pub struct TaskTable {
    tasks: Vec<Task>,
}

impl TaskTable {
    /// Resolve `tasks` against `registry`.
    ///
    /// Every task must have a finite, non-negative weight, a unique name, a
    /// registered connection, an action that connection exposes, and static
    /// parameters that satisfy the action's schema. Tasks failing any check
    /// are returned in the rejected list.
    pub async fn resolve(tasks: Vec<Task>, registry: &ConnectionRegistry) -> (Self, Vec<RejectedTask>) {
        let mut accepted = Vec::with_capacity(tasks.len());
        let mut rejected = Vec::new();
        let mut seen = HashSet::new();

        for task in tasks {
            match Self::check(&task, registry, &seen).await {
                Ok(()) => {
                    seen.insert(task.name.clone());
                    accepted.push(task);
                }
                Err(error) => {
                    tracing::warn!(task = %task.name, error = %error, "Rejected task");
                    rejected.push(RejectedTask { name: task.name, error });
                }
            }
        }

        (Self { tasks: accepted }, rejected)
    }

    /// Like [`TaskTable::resolve`] but any rejection is fatal.
    pub async fn resolve_strict(tasks: Vec<Task>, registry: &ConnectionRegistry) -> Result<Self> {
        let (table, mut rejected) = Self::resolve(tasks, registry).await;
        match rejected.len() {
            0 => Ok(table),
            1 => Err(rejected.remove(0).error),
            n => Err(AgentError::Configuration(format!(
                "{} tasks failed validation: {}",
                n,
                rejected
                    .iter()
                    .map(|r| format!("{} ({})", r.name, r.error))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    async fn check(task: &Task, registry: &ConnectionRegistry, seen: &HashSet<String>) -> Result<()> {
        if task.name.trim().is_empty() {
            return Err(AgentError::Configuration("task name cannot be empty".to_string()));
        }
        if seen.contains(&task.name) {
            return Err(AgentError::Configuration(format!("duplicate task '{}'", task.name)));
        }
        if !task.weight.is_finite() || task.weight < 0.0 {
            return Err(AgentError::Configuration(format!(
                "task '{}' has invalid weight {}",
                task.name, task.weight
            )));
        }

        let action = registry.action(&task.target.connection, &task.target.action).await?;
        action
            .validate(&task.params)
            .map_err(|errors| AgentError::Validation {
                task: task.name.clone(),
                errors,
            })?;
        Ok(())
    }

    /// Build a table without registry checks. Used by tests and tooling that
    /// has already validated the tasks.
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
