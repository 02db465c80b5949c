//! The agent loop.
//!
//! One [`Scheduler`] drives one agent through
//! `SELECT → VALIDATE → INVOKE → (SUCCESS | RETRY | FAIL) → PACE` until a stop
//! is requested. It is the only writer of its [`LoopState`]; everything else
//! observes the loop through the published [`LoopStatus`].

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, oneshot, watch};

use super::dispatch::{DispatchOutcome, Dispatcher, stop_requested};
use super::select::WeightedSelector;
use super::state::{LoopState, LoopStatus};
use crate::agent::Agent;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{AgentError, Result};
use crate::tasks::Task;

/// Request delivered to a running loop between iterations.
#[derive(Debug)]
pub enum LoopCommand {
    /// Run one task outside the schedule and report the outcome.
    RunAction {
        task: String,
        reply: oneshot::Sender<Result<DispatchOutcome>>,
    },
}

/// What one pass of the loop did.
#[derive(Debug)]
pub struct Iteration {
    pub number: u64,
    /// `None` when no task had positive weight
    pub task: Option<String>,
    pub outcome: Option<DispatchOutcome>,
}

pub struct Scheduler {
    agent: Agent,
    dispatcher: Dispatcher,
    state: LoopState,
    rng: StdRng,
    clock: Arc<dyn Clock>,
    failure_threshold: Option<u32>,
    failure_cooldown: Option<Duration>,
    running: bool,
    halted: Option<String>,
    status_tx: watch::Sender<LoopStatus>,
    #[cfg(test)]
    forced_index: Option<usize>,
}

impl Scheduler {
    pub fn new(agent: Agent, engine: &EngineConfig) -> Self {
        let dispatcher = Dispatcher::new(agent.registry().clone())
            .with_retry(engine.retry_policy())
            .with_invoke_timeout(engine.invoke_timeout());
        let rng = match engine.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let state = LoopState::new();
        let (status_tx, _) = watch::channel(LoopStatus::snapshot(&agent.name, false, &state));

        Self {
            agent,
            dispatcher,
            state,
            rng,
            clock: Arc::new(SystemClock),
            failure_threshold: engine.failure_threshold(),
            failure_cooldown: engine.failure_cooldown(),
            running: false,
            halted: None,
            status_tx,
            #[cfg(test)]
            forced_index: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Receiver of status snapshots published after every iteration.
    pub fn subscribe(&self) -> watch::Receiver<LoopStatus> {
        self.status_tx.subscribe()
    }

    /// Latest published status
    pub fn status(&self) -> LoopStatus {
        self.status_tx.borrow().clone()
    }

    /// Effective weight of `task` at `now`, including soft-disable.
    pub fn effective_weight(&self, task: &Task, now: &NaiveDateTime) -> f64 {
        if self
            .state
            .is_suppressed(&task.name, self.failure_threshold, self.failure_cooldown)
        {
            return 0.0;
        }
        self.agent.policy.effective_weight(&task.name, task.weight, now)
    }

    /// Effective weights of every active task, in table order
    pub fn effective_weights(&self) -> Vec<f64> {
        let now = self.clock.now();
        self.agent
            .tasks
            .tasks()
            .iter()
            .map(|t| self.effective_weight(t, &now))
            .collect()
    }

    /// SELECT: draw a task proportionally to its effective weight.
    pub fn select_task(&mut self) -> Result<Option<Task>> {
        let selector = WeightedSelector::new(&self.effective_weights());
        let Some(index) = self.draw(&selector) else {
            return Ok(None);
        };
        self.agent.tasks.tasks().get(index).cloned().map(Some).ok_or_else(|| {
            AgentError::EngineFatal(format!(
                "selector returned index {} for {} tasks",
                index,
                self.agent.tasks.len()
            ))
        })
    }

    #[cfg(not(test))]
    fn draw(&mut self, selector: &WeightedSelector) -> Option<usize> {
        selector.select(&mut self.rng)
    }

    #[cfg(test)]
    fn draw(&mut self, selector: &WeightedSelector) -> Option<usize> {
        self.forced_index.take().or_else(|| selector.select(&mut self.rng))
    }

    /// Make the next SELECT return `index` regardless of weights.
    #[cfg(test)]
    pub(crate) fn force_next_index(&mut self, index: usize) {
        self.forced_index = Some(index);
    }

    /// Loop State may only track tasks of the active table.
    fn check_state(&self) -> Result<()> {
        let unknown = self
            .state
            .failure_counts()
            .into_keys()
            .find(|name| self.agent.tasks.get(name).is_none());
        match unknown {
            Some(name) => Err(AgentError::EngineFatal(format!(
                "loop state tracks failures for unknown task '{}'",
                name
            ))),
            None => Ok(()),
        }
    }

    /// One full iteration without the PACE wait.
    ///
    /// Only engine invariant violations are returned as errors; action
    /// failures are recorded and reported in the [`Iteration`].
    pub async fn run_iteration(&mut self, stop: &mut watch::Receiver<bool>) -> Result<Iteration> {
        self.check_state()?;
        self.state.iteration_count += 1;
        let number = self.state.iteration_count;

        let Some(task) = self.select_task()? else {
            tracing::debug!(agent = %self.agent.name, iteration = number, "No task with positive weight");
            self.publish();
            return Ok(Iteration {
                number,
                task: None,
                outcome: None,
            });
        };
        tracing::info!(agent = %self.agent.name, iteration = number, task = %task.name, "Selected task");
        let outcome = self.dispatcher.dispatch(&task, stop).await;
        self.record(&task.name, &outcome);
        self.publish();

        Ok(Iteration {
            number,
            task: Some(task.name),
            outcome: Some(outcome),
        })
    }

    /// VALIDATE → INVOKE for a named task, outside the schedule.
    pub async fn run_single_action(
        &mut self,
        name: &str,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<DispatchOutcome> {
        let task = self
            .agent
            .tasks
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::TaskNotFound(name.to_string()))?;

        tracing::info!(agent = %self.agent.name, task = %name, "Running single action");
        let outcome = self.dispatcher.dispatch(&task, stop).await;
        self.record(name, &outcome);
        self.publish();
        Ok(outcome)
    }

    fn record(&mut self, task: &str, outcome: &DispatchOutcome) {
        let agent = &self.agent.name;
        self.state.last_task = Some(task.to_string());

        let summary = match outcome {
            DispatchOutcome::Succeeded { attempts, .. } => {
                if self.state.failure_count(task) > 0 {
                    tracing::info!(agent = %agent, task = %task, "Task recovered, failure counter reset");
                }
                self.state.record_success(task);
                tracing::info!(agent = %agent, task = %task, attempt = attempts, "Action succeeded");
                outcome.label().to_string()
            }
            DispatchOutcome::Failed { attempts, error } => {
                let failures = self.state.record_failure(task);
                tracing::error!(
                    agent = %agent,
                    task = %task,
                    kind = error.kind(),
                    attempt = attempts,
                    failures,
                    error = %error,
                    "Action failed"
                );
                if self.failure_threshold == Some(failures) {
                    tracing::warn!(agent = %agent, task = %task, failures, "Task soft-disabled");
                }
                format!("{}: {}", outcome.label(), error)
            }
            DispatchOutcome::Skipped { error } => format!("{}: {}", outcome.label(), error),
            DispatchOutcome::Interrupted { attempts, last_error } => {
                format!("{} after {} attempt(s): {}", outcome.label(), attempts, last_error)
            }
        };
        self.state.last_outcome = Some(summary);
    }

    fn publish(&self) {
        let mut status = LoopStatus::snapshot(&self.agent.name, self.running, &self.state);
        status.halted = self.halted.clone();
        self.status_tx.send_replace(status);
    }

    /// Clear loop state and publish the cleared status.
    pub fn reset(&mut self) {
        self.state.reset();
        self.running = false;
        self.halted = None;
        self.publish();
    }

    /// Inter-iteration wait: the fixed delay plus uniform jitter.
    fn pace_delay(&mut self) -> Duration {
        let jitter = self.agent.loop_jitter.as_secs_f64();
        let extra = if jitter > 0.0 {
            Duration::from_secs_f64(self.rng.random_range(0.0..=jitter))
        } else {
            Duration::ZERO
        };
        self.agent.loop_delay.saturating_add(extra)
    }

    /// PACE. Returns true when a stop was requested.
    async fn pace(&mut self, stop: &mut watch::Receiver<bool>, commands: &mut mpsc::Receiver<LoopCommand>) -> bool {
        let delay = self.pace_delay();
        tracing::debug!(agent = %self.agent.name, delay_ms = delay.as_millis() as u64, "Pacing");
        // Saturates for delays past the timer's range
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        let mut accepting = true;

        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                _ = stop_requested(stop) => return true,
                command = commands.recv(), if accepting => match command {
                    Some(command) => self.handle_command(command, stop).await,
                    None => accepting = false,
                },
            }
        }
    }

    async fn handle_command(&mut self, command: LoopCommand, stop: &mut watch::Receiver<bool>) {
        match command {
            LoopCommand::RunAction { task, reply } => {
                let result = self.run_single_action(&task, stop).await;
                if reply.send(result).is_err() {
                    tracing::debug!(agent = %self.agent.name, task = %task, "Requester dropped before reply");
                }
            }
        }
    }

    /// Run until `stop` is set.
    ///
    /// Returns an error only when an engine invariant is violated; the halt
    /// reason is then also carried in the published status.
    pub async fn run(
        &mut self,
        mut stop: watch::Receiver<bool>,
        mut commands: mpsc::Receiver<LoopCommand>,
    ) -> Result<()> {
        self.running = true;
        self.halted = None;
        self.publish();
        tracing::info!(
            agent = %self.agent.name,
            tasks = self.agent.tasks.len(),
            delay_ms = self.agent.loop_delay.as_millis() as u64,
            "Loop started"
        );

        let result = self.run_until_stopped(&mut stop, &mut commands).await;

        self.running = false;
        if let Err(e) = &result {
            tracing::error!(agent = %self.agent.name, error = %e, "Loop halted");
            self.halted = Some(e.to_string());
        }
        self.publish();

        commands.close();
        while let Ok(LoopCommand::RunAction { reply, .. }) = commands.try_recv() {
            let _ = reply.send(Err(AgentError::InvalidState("loop is not running".to_string())));
        }

        tracing::info!(
            agent = %self.agent.name,
            iterations = self.state.iteration_count,
            "Loop stopped"
        );
        result
    }

    async fn run_until_stopped(
        &mut self,
        stop: &mut watch::Receiver<bool>,
        commands: &mut mpsc::Receiver<LoopCommand>,
    ) -> Result<()> {
        loop {
            if *stop.borrow() {
                return Ok(());
            }
            while let Ok(command) = commands.try_recv() {
                self.handle_command(command, stop).await;
            }
            match self.run_iteration(stop).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(agent = %self.agent.name, kind = e.kind(), error = %e, "Iteration failed");
                }
            }
            if self.pace(stop, commands).await {
                return Ok(());
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("agent", &self.agent.name)
            .field("running", &self.running)
            .field("iteration_count", &self.state.iteration_count)
            .finish()
    }
}
