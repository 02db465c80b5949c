//! Command surface for one agent.
//!
//! [`AgentRuntime`] owns a [`Scheduler`] and moves it onto a tokio task while
//! the loop runs:
//! - `start_loop` spawns the loop
//! - `stop_loop` signals it, waits for the in-flight iteration, resets state
//! - `run_single_action` runs directly when idle, or is queued to the loop
//! - `get_loop_status` reads the latest published snapshot

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::dispatch::DispatchOutcome;
use super::engine::{LoopCommand, Scheduler};
use super::state::LoopStatus;
use crate::agent::Agent;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{AgentError, Result};

/// Pending manual actions a running loop will queue
const COMMAND_BUFFER: usize = 16;

struct RunningLoop {
    stop_tx: watch::Sender<bool>,
    commands: mpsc::Sender<LoopCommand>,
    handle: JoinHandle<(Scheduler, Result<()>)>,
}

pub struct AgentRuntime {
    name: String,
    engine: EngineConfig,
    clock: Arc<dyn Clock>,
    /// Present while idle
    scheduler: Option<Scheduler>,
    /// Present while a loop task exists
    running: Option<RunningLoop>,
    status_rx: watch::Receiver<LoopStatus>,
}

impl AgentRuntime {
    pub fn new(agent: Agent, engine: &EngineConfig) -> Self {
        Self::with_clock(agent, engine, Arc::new(SystemClock))
    }

    pub fn with_clock(agent: Agent, engine: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let scheduler = Scheduler::new(agent, engine).with_clock(clock.clone());
        Self::from_scheduler(scheduler, engine, clock)
    }

    fn from_scheduler(scheduler: Scheduler, engine: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: scheduler.agent().name.clone(),
            engine: engine.clone(),
            clock,
            status_rx: scheduler.subscribe(),
            scheduler: Some(scheduler),
            running: None,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.name
    }

    /// The idle scheduler, if the loop is not running
    pub fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    /// Whether a loop task exists, even one that halted on a fatal error
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<LoopStatus> {
        self.status_rx.clone()
    }

    /// Start the loop on a new tokio task.
    pub fn start_loop(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(AgentError::InvalidState(format!(
                "loop for agent '{}' is already running",
                self.name
            )));
        }
        let Some(mut scheduler) = self.scheduler.take() else {
            return Err(AgentError::InvalidState("scheduler unavailable".to_string()));
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = tokio::spawn(async move {
            let result = scheduler.run(stop_rx, command_rx).await;
            (scheduler, result)
        });

        self.running = Some(RunningLoop {
            stop_tx,
            commands,
            handle,
        });
        tracing::info!(agent = %self.name, "Loop start requested");
        Ok(())
    }

    /// Stop the loop and return its final status.
    ///
    /// Waits for an in-flight action to finish or time out. Loop state is
    /// reset afterwards. If the loop had halted on an engine fatal error,
    /// that error is returned instead.
    pub async fn stop_loop(&mut self) -> Result<LoopStatus> {
        let Some(running) = self.running.take() else {
            return Err(AgentError::InvalidState(format!(
                "loop for agent '{}' is not running",
                self.name
            )));
        };

        tracing::info!(agent = %self.name, "Loop stop requested");
        // Loop may have exited already
        let _ = running.stop_tx.send(true);
        drop(running.commands);

        let (mut scheduler, result) = running
            .handle
            .await
            .map_err(|e| AgentError::EngineFatal(format!("loop task failed: {}", e)))?;

        let final_status = scheduler.status();
        scheduler.reset();
        self.scheduler = Some(scheduler);
        result.map(|()| final_status)
    }

    /// Run one task outside the schedule.
    ///
    /// While the loop runs the request is queued and served between
    /// iterations, so loop state keeps a single writer.
    pub async fn run_single_action(&mut self, task: &str) -> Result<DispatchOutcome> {
        if let Some(running) = &self.running {
            let (reply, reply_rx) = oneshot::channel();
            running
                .commands
                .send(LoopCommand::RunAction {
                    task: task.to_string(),
                    reply,
                })
                .await
                .map_err(|_| AgentError::InvalidState("loop is not accepting commands".to_string()))?;
            return reply_rx
                .await
                .map_err(|_| AgentError::InvalidState("loop exited before running the action".to_string()))?;
        }

        let Some(scheduler) = self.scheduler.as_mut() else {
            return Err(AgentError::InvalidState("scheduler unavailable".to_string()));
        };
        // Nothing can request a stop while idle
        let (_stop_tx, mut stop_rx) = watch::channel(false);
        scheduler.run_single_action(task, &mut stop_rx).await
    }

    /// Latest loop status snapshot
    pub fn get_loop_status(&self) -> LoopStatus {
        self.status_rx.borrow().clone()
    }

    /// Replace the agent. Only allowed while stopped; loop state starts fresh.
    pub fn reload(&mut self, agent: Agent) -> Result<()> {
        if self.running.is_some() {
            return Err(AgentError::InvalidState(format!(
                "cannot reload agent '{}' while its loop is running",
                self.name
            )));
        }
        tracing::info!(agent = %agent.name, previous = %self.name, "Reloading agent");
        let engine = self.engine.clone();
        let clock = self.clock.clone();
        let scheduler = Scheduler::new(agent, &engine).with_clock(clock.clone());
        *self = Self::from_scheduler(scheduler, &engine, clock);
        Ok(())
    }
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("agent", &self.name)
            .field("running", &self.running.is_some())
            .finish()
    }
}
