//! Agent loop integration tests
//!
//! Drives the runtime end to end against scripted connections.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentloop::agent::Agent;
use agentloop::clock::FixedClock;
use agentloop::config::{AgentDescriptor, EngineConfig};
use agentloop::connection::{
    ActionDescriptor, ActionError, ActionErrorKind, Connection, ConnectionRegistry, ConnectionState, Params,
};
use agentloop::scheduler::{AgentRuntime, DispatchOutcome, Scheduler};
use agentloop::tasks::{Composition, MultiplierPolicy, Task, TaskTable, TaskTarget, builtin_rules};
use agentloop::{AgentError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Value, json};

type Reply = std::result::Result<Value, ActionError>;

/// Connection that replays scripted replies, then succeeds.
#[derive(Default)]
struct Scripted {
    script: Mutex<VecDeque<Reply>>,
    delay: Duration,
    calls: Arc<AtomicU32>,
    started: Arc<AtomicBool>,
    finished: Arc<AtomicU32>,
}

impl Scripted {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Connection for Scripted {
    fn name(&self) -> &str {
        "platform"
    }

    fn list_actions(&self) -> Vec<ActionDescriptor> {
        vec![
            ActionDescriptor::new("post", "Post something"),
            ActionDescriptor::new("like", "Like something"),
        ]
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Configured
    }

    async fn perform_action(&self, action: &str, _params: &Params) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        self.finished.fetch_add(1, Ordering::SeqCst);
        next.unwrap_or_else(|| Ok(json!({"action": action})))
    }
}

fn transient() -> Reply {
    Err(ActionError::new(ActionErrorKind::Network, "connection reset"))
}

fn engine(max_attempts: u32) -> EngineConfig {
    EngineConfig {
        max_attempts,
        initial_backoff_ms: 5,
        max_backoff_ms: 20,
        failure_threshold: Some(3),
        seed: Some(1),
        ..Default::default()
    }
}

fn registry(conn: Scripted) -> Arc<ConnectionRegistry> {
    let mut registry = ConnectionRegistry::new();
    registry.register_connection(conn);
    Arc::new(registry)
}

fn agent(registry: Arc<ConnectionRegistry>, tasks: Vec<Task>) -> Agent {
    Agent::new("integration", registry, TaskTable::from_tasks(tasks)).with_loop_delay(Duration::from_millis(5))
}

fn post(weight: f64) -> Task {
    Task::new("post", weight, TaskTarget::new("platform", "post"))
}

fn like(weight: f64) -> Task {
    Task::new("like", weight, TaskTarget::new("platform", "like"))
}

#[tokio::test]
async fn test_two_transient_failures_then_success() -> Result<()> {
    let conn = Scripted::new(vec![transient(), transient()]);
    let calls = conn.calls.clone();
    let mut runtime = AgentRuntime::new(agent(registry(conn), vec![post(1.0)]), &engine(3));

    let outcome = runtime.run_single_action("post").await?;
    assert!(matches!(outcome, DispatchOutcome::Succeeded { attempts: 3, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(runtime.get_loop_status().failure_counts.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_count_one_failure() -> Result<()> {
    let conn = Scripted::new((0..10).map(|_| transient()).collect());
    let calls = conn.calls.clone();
    let mut runtime = AgentRuntime::new(agent(registry(conn), vec![post(1.0)]), &engine(2));

    let outcome = runtime.run_single_action("post").await?;
    assert!(matches!(
        outcome,
        DispatchOutcome::Failed {
            attempts: 2,
            error: AgentError::Transient { .. }
        }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(runtime.get_loop_status().failure_counts.get("post"), Some(&1));

    runtime.run_single_action("post").await?;
    assert_eq!(runtime.get_loop_status().failure_counts.get("post"), Some(&2));
    Ok(())
}

#[tokio::test]
async fn test_threshold_forces_zero_weight_until_success() -> Result<()> {
    let permanent = || Err(ActionError::new(ActionErrorKind::Rejected, "duplicate"));
    let conn = Scripted::new(vec![permanent(), permanent(), permanent()]);
    let mut runtime = AgentRuntime::new(agent(registry(conn), vec![post(1.0), like(1.0)]), &engine(3));

    for _ in 0..3 {
        let outcome = runtime.run_single_action("post").await?;
        assert!(outcome.is_failure());
    }
    let weights = runtime.scheduler().map(|s| s.effective_weights()).unwrap();
    assert_eq!(weights, vec![0.0, 1.0]);

    // Script exhausted: the next call succeeds
    let outcome = runtime.run_single_action("post").await?;
    assert!(outcome.is_success());
    assert!(!runtime.get_loop_status().failure_counts.contains_key("post"));
    let weights = runtime.scheduler().map(|s| s.effective_weights()).unwrap();
    assert_eq!(weights, vec![1.0, 1.0]);
    Ok(())
}

#[tokio::test]
async fn test_soft_disabled_task_never_selected_by_loop() -> Result<()> {
    let permanent = || Err(ActionError::new(ActionErrorKind::Rejected, "duplicate"));
    let conn = Scripted::new(vec![permanent(), permanent(), permanent()]);
    let calls = conn.calls.clone();
    let mut runtime = AgentRuntime::new(agent(registry(conn), vec![post(1.0)]), &engine(1));

    for _ in 0..3 {
        runtime.run_single_action("post").await?;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let mut status = runtime.subscribe();
    runtime.start_loop()?;
    status.wait_for(|s| s.iteration_count >= 5).await.unwrap();
    let final_status = runtime.stop_loop().await?;

    // Iterations ran but no action was dispatched
    assert!(final_status.iteration_count >= 5);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_invoke() -> Result<()> {
    let conn = Scripted::new(vec![]).with_delay(Duration::from_millis(200));
    let started = conn.started.clone();
    let finished = conn.finished.clone();
    let mut agent = agent(registry(conn), vec![post(1.0)]);
    agent.loop_delay = Duration::from_secs(60);
    let mut runtime = AgentRuntime::new(agent, &engine(3));

    runtime.start_loop()?;
    while !started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let final_status = runtime.stop_loop().await?;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(final_status.iteration_count, 1);
    assert_eq!(final_status.last_task.as_deref(), Some("post"));
    assert_eq!(final_status.last_outcome.as_deref(), Some("success"));
    assert!(!runtime.is_running());
    Ok(())
}

#[tokio::test]
async fn test_stop_interrupts_pacing_promptly() -> Result<()> {
    let mut agent = agent(registry(Scripted::new(vec![])), vec![post(1.0)]);
    agent.loop_delay = Duration::from_secs(3600);
    let mut runtime = AgentRuntime::new(agent, &engine(3));
    let mut status = runtime.subscribe();

    runtime.start_loop()?;
    status.wait_for(|s| s.iteration_count == 1).await.unwrap();

    let stopped = tokio::time::timeout(Duration::from_secs(2), runtime.stop_loop()).await;
    assert!(stopped.is_ok(), "stop should not wait for the full loop delay");
    Ok(())
}

#[tokio::test]
async fn test_selection_follows_weights() -> Result<()> {
    let agent = agent(registry(Scripted::new(vec![])), vec![post(1.0), like(3.0)]);
    let mut scheduler = Scheduler::new(agent, &engine(3));

    let trials = 10_000;
    let mut posts = 0;
    for _ in 0..trials {
        let task = scheduler.select_task()?.expect("positive weights");
        if task.name == "post" {
            posts += 1;
        }
    }
    let share = posts as f64 / trials as f64;
    assert!((share - 0.25).abs() < 0.02, "post share was {}", share);
    Ok(())
}

#[tokio::test]
async fn test_night_multiplier() {
    let at = |hour| {
        NaiveDate::from_ymd_opt(2025, 3, 4)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    };
    let tweet = Task::new("post-tweet", 1.0, TaskTarget::new("platform", "post"));
    let agent = Agent::new(
        "night",
        registry(Scripted::new(vec![])),
        TaskTable::from_tasks(vec![tweet.clone()]),
    )
    .with_policy(MultiplierPolicy::new(true, Composition::Multiply, builtin_rules()));
    let scheduler = Scheduler::new(agent, &engine(3)).with_clock(Arc::new(FixedClock::new(at(3))));

    assert!((scheduler.effective_weight(&tweet, &at(3)) - 0.4).abs() < 1e-9);
    assert_eq!(scheduler.effective_weight(&tweet, &at(14)), 1.0);
    assert!((scheduler.effective_weights()[0] - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn test_missing_target_excluded_from_loaded_agent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("example.json");
    std::fs::write(
        &path,
        r#"{
            "name": "example",
            "loop_delay": 0.01,
            "config": [{"name": "echo"}],
            "tasks": [
                {"name": "post-message", "weight": 1, "connection": "echo", "params": {"message": "gm"}},
                {"name": "post-tweet", "weight": 5, "connection": "twitter"}
            ]
        }"#,
    )?;
    let descriptor = AgentDescriptor::load(&path)?;

    let strict = Agent::load(&descriptor, &EngineConfig::default()).await;
    assert!(matches!(strict, Err(ref e) if e.is_configuration()));

    let lenient = EngineConfig {
        strict_tasks: false,
        ..engine(3)
    };
    let loaded = Agent::load(&descriptor, &lenient).await?;
    assert_eq!(loaded.rejected.len(), 1);
    assert_eq!(loaded.agent.tasks.names(), vec!["post-message"]);

    let mut runtime = AgentRuntime::new(loaded.agent, &lenient);
    let mut status = runtime.subscribe();
    runtime.start_loop()?;
    status.wait_for(|s| s.iteration_count >= 10).await.unwrap();
    let final_status = runtime.stop_loop().await?;
    assert_eq!(final_status.last_task.as_deref(), Some("post-message"));
    assert!(final_status.failure_counts.is_empty());

    let err = runtime.run_single_action("post-tweet").await.unwrap_err();
    assert!(matches!(err, AgentError::TaskNotFound(_)));
    Ok(())
}

#[tokio::test]
async fn test_agents_share_one_registry() -> Result<()> {
    let conn = Scripted::new(vec![]);
    let calls = conn.calls.clone();
    let shared = registry(conn);

    let mut first = AgentRuntime::new(agent(shared.clone(), vec![post(1.0)]), &engine(3));
    let mut second = AgentRuntime::new(agent(shared.clone(), vec![like(1.0)]), &engine(3));
    let mut first_status = first.subscribe();
    let mut second_status = second.subscribe();

    first.start_loop()?;
    second.start_loop()?;
    first_status.wait_for(|s| s.iteration_count >= 3).await.unwrap();
    second_status.wait_for(|s| s.iteration_count >= 3).await.unwrap();

    // Reconfiguring waits for in-flight calls and does not disturb the loops
    shared.configure("platform", &Params::new()).await?;

    let a = first.stop_loop().await?;
    let b = second.stop_loop().await?;
    assert_eq!(a.last_task.as_deref(), Some("post"));
    assert_eq!(b.last_task.as_deref(), Some("like"));
    assert!(calls.load(Ordering::SeqCst) >= 6);
    Ok(())
}
