//! Loop state owned by a single running scheduler.
//!
//! Only the loop writes this state. Readers get [`LoopStatus`] snapshots
//! published after every iteration.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-agent loop bookkeeping
#[derive(Debug, Default)]
pub struct LoopState {
    pub iteration_count: u64,
    pub last_task: Option<String>,
    /// Outcome label of the last dispatch, with the error if any
    pub last_outcome: Option<String>,
    pub last_action_at: Option<DateTime<Utc>>,
    failures: HashMap<String, FailureRecord>,
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    consecutive: u32,
    last_failure: Instant,
}

impl LoopState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive failures recorded for `task`
    pub fn failure_count(&self, task: &str) -> u32 {
        self.failures.get(task).map(|f| f.consecutive).unwrap_or(0)
    }

    /// Reset the task's counter to zero.
    pub fn record_success(&mut self, task: &str) {
        self.failures.remove(task);
        self.last_action_at = Some(Utc::now());
    }

    /// Increment the task's counter and return the new value.
    pub fn record_failure(&mut self, task: &str) -> u32 {
        let entry = self.failures.entry(task.to_string()).or_insert(FailureRecord {
            consecutive: 0,
            last_failure: Instant::now(),
        });
        entry.consecutive = entry.consecutive.saturating_add(1);
        entry.last_failure = Instant::now();
        self.last_action_at = Some(Utc::now());
        entry.consecutive
    }

    /// Whether `task` is soft-disabled.
    ///
    /// A task is suppressed once its counter reaches `threshold`. With a
    /// cooldown, it becomes eligible again once the cooldown has elapsed since
    /// its last failure; without one it stays suppressed until a success.
    pub fn is_suppressed(&self, task: &str, threshold: Option<u32>, cooldown: Option<Duration>) -> bool {
        let Some(threshold) = threshold else {
            return false;
        };
        let Some(record) = self.failures.get(task) else {
            return false;
        };
        if record.consecutive < threshold {
            return false;
        }
        match cooldown {
            Some(cooldown) => record.last_failure.elapsed() < cooldown,
            None => true,
        }
    }

    /// Failure counters, sorted by task name
    pub fn failure_counts(&self) -> BTreeMap<String, u32> {
        self.failures
            .iter()
            .map(|(name, f)| (name.clone(), f.consecutive))
            .collect()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Read-only snapshot of a loop, as returned by `get_loop_status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopStatus {
    pub agent: String,
    pub running: bool,
    pub iteration_count: u64,
    pub last_task: Option<String>,
    pub last_outcome: Option<String>,
    pub last_action_at: Option<DateTime<Utc>>,
    pub failure_counts: BTreeMap<String, u32>,
    /// Set when the loop halted on an engine fatal error
    pub halted: Option<String>,
}

impl LoopStatus {
    pub fn snapshot(agent: &str, running: bool, state: &LoopState) -> Self {
        Self {
            agent: agent.to_string(),
            running,
            iteration_count: state.iteration_count,
            last_task: state.last_task.clone(),
            last_outcome: state.last_outcome.clone(),
            last_action_at: state.last_action_at,
            failure_counts: state.failure_counts(),
            halted: None,
        }
    }
}
