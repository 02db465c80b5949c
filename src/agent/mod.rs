//! Agent assembly.
//!
//! Turns a descriptor into a runnable [`Agent`]:
//! - builds and configures the connection registry
//! - resolves every task against it
//! - compiles the time-based multiplier policy

use std::sync::Arc;
use std::time::Duration;

use crate::adapters;
use crate::config::{AgentDescriptor, EngineConfig};
use crate::connection::ConnectionRegistry;
use crate::error::Result;
use crate::tasks::{MultiplierPolicy, RejectedTask, TaskTable};

/// A loaded agent, ready to be scheduled.
#[derive(Debug, Clone)]
pub struct Agent {
    pub name: String,
    /// Fixed wait between iterations
    pub loop_delay: Duration,
    /// Upper bound of the random extra wait
    pub loop_jitter: Duration,
    pub tasks: TaskTable,
    pub policy: MultiplierPolicy,
    registry: Arc<ConnectionRegistry>,
}

impl Agent {
    pub fn new(name: impl Into<String>, registry: Arc<ConnectionRegistry>, tasks: TaskTable) -> Self {
        Self {
            name: name.into(),
            loop_delay: Duration::ZERO,
            loop_jitter: Duration::ZERO,
            tasks,
            policy: MultiplierPolicy::disabled(),
            registry,
        }
    }

    pub fn with_loop_delay(mut self, delay: Duration) -> Self {
        self.loop_delay = delay;
        self
    }

    pub fn with_loop_jitter(mut self, jitter: Duration) -> Self {
        self.loop_jitter = jitter;
        self
    }

    pub fn with_policy(mut self, policy: MultiplierPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Load an agent with its own registry of built-in adapters.
    pub async fn load(descriptor: &AgentDescriptor, engine: &EngineConfig) -> Result<LoadedAgent> {
        let registry = adapters::build_registry(&descriptor.config).await?;
        Self::load_with_registry(descriptor, Arc::new(registry), engine).await
    }

    /// Load an agent against an existing, possibly shared, registry.
    ///
    /// With `strict_tasks` any task that fails resolution fails the load.
    /// Otherwise such tasks are excluded from the active set and reported in
    /// [`LoadedAgent::rejected`].
    pub async fn load_with_registry(
        descriptor: &AgentDescriptor,
        registry: Arc<ConnectionRegistry>,
        engine: &EngineConfig,
    ) -> Result<LoadedAgent> {
        descriptor.validate()?;
        let policy = descriptor.policy(engine.composition)?;

        let (tasks, rejected) = if engine.strict_tasks {
            (TaskTable::resolve_strict(descriptor.tasks(), &registry).await?, Vec::new())
        } else {
            TaskTable::resolve(descriptor.tasks(), &registry).await
        };

        tracing::info!(
            agent = %descriptor.name,
            tasks = tasks.len(),
            rejected = rejected.len(),
            "Loaded agent"
        );

        let agent = Agent::new(descriptor.name.clone(), registry, tasks)
            .with_loop_delay(descriptor.loop_delay()?)
            .with_loop_jitter(descriptor.loop_jitter()?)
            .with_policy(policy);
        Ok(LoadedAgent { agent, rejected })
    }
}

/// Result of loading an agent
#[derive(Debug)]
pub struct LoadedAgent {
    pub agent: Agent,
    /// Tasks excluded from the active set (non-strict loads only)
    pub rejected: Vec<RejectedTask>,
}
