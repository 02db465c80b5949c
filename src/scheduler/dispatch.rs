//! VALIDATE → INVOKE → RETRY for a single task.
//!
//! The dispatcher owns no loop state. It resolves a task against the
//! registry, calls the connection under its read lock with a bounded timeout,
//! and retries transient failures with exponential backoff. The caller decides
//! what the [`DispatchOutcome`] means for the failure counters.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;

use super::backoff::RetryPolicy;
use crate::connection::{ActionError, ActionErrorKind, ConnectionRegistry, Params, SharedConnection};
use crate::error::{AgentError, Result};
use crate::tasks::Task;

/// Default bound on a single `perform_action` call.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of dispatching one task.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The action returned a value.
    Succeeded { attempts: u32, output: Value },
    /// Retries exhausted or a permanent error. Counts as a failure.
    Failed { attempts: u32, error: AgentError },
    /// VALIDATE rejected the task. Not counted as a failure.
    Skipped { error: AgentError },
    /// A stop request arrived during backoff.
    Interrupted { attempts: u32, last_error: ActionError },
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Succeeded { .. })
    }

    /// Whether this outcome increments the task's failure counter.
    pub fn is_failure(&self) -> bool {
        matches!(self, DispatchOutcome::Failed { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DispatchOutcome::Succeeded { attempts, .. }
            | DispatchOutcome::Failed { attempts, .. }
            | DispatchOutcome::Interrupted { attempts, .. } => *attempts,
            DispatchOutcome::Skipped { .. } => 0,
        }
    }

    /// Short label used in the status' last outcome.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Succeeded { .. } => "success",
            DispatchOutcome::Failed { .. } => "failed",
            DispatchOutcome::Skipped { .. } => "skipped",
            DispatchOutcome::Interrupted { .. } => "interrupted",
        }
    }
}

/// Resolves and invokes tasks against a shared registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    retry: RetryPolicy,
    invoke_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            retry: RetryPolicy::default(),
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    /// VALIDATE: resolve the task's target and check its parameters.
    ///
    /// Returns the connection handle and the coerced parameters.
    pub async fn validate(&self, task: &Task) -> Result<(SharedConnection, Params)> {
        let target = &task.target;
        let conn = self.registry.get(&target.connection)?;
        let params = {
            let guard = conn.read().await;
            if !guard.is_configured() {
                return Err(AgentError::Configuration(format!(
                    "connection '{}' is {}",
                    target.connection,
                    guard.state()
                )));
            }
            let action = guard.action(&target.action).ok_or_else(|| AgentError::ActionNotFound {
                connection: target.connection.clone(),
                action: target.action.clone(),
            })?;
            action.validate(&task.params).map_err(|errors| AgentError::Validation {
                task: task.name.clone(),
                errors,
            })?
        };
        Ok((conn, params))
    }

    /// One `perform_action` call under the connection's read lock.
    async fn invoke_once(
        &self,
        conn: &SharedConnection,
        action: &str,
        params: &Params,
    ) -> std::result::Result<Value, ActionError> {
        let guard = conn.read().await;
        match tokio::time::timeout(self.invoke_timeout, guard.perform_action(action, params)).await {
            Ok(result) => result,
            Err(_) => Err(ActionError::new(
                ActionErrorKind::Timeout,
                format!("no response within {}ms", self.invoke_timeout.as_millis()),
            )),
        }
    }

    /// Run VALIDATE and INVOKE with retries.
    ///
    /// `stop` is observed only while waiting between attempts; an attempt that
    /// has started always runs to completion or timeout.
    pub async fn dispatch(&self, task: &Task, stop: &mut watch::Receiver<bool>) -> DispatchOutcome {
        let (conn, params) = match self.validate(task).await {
            Ok(resolved) => resolved,
            Err(error) => {
                tracing::warn!(task = %task.name, kind = error.kind(), error = %error, "Skipping task");
                return DispatchOutcome::Skipped { error };
            }
        };

        let action = task.target.action.as_str();
        let mut attempts = 0;
        loop {
            attempts += 1;
            tracing::debug!(task = %task.name, target = %task.target, attempt = attempts, "Invoking action");

            let err = match self.invoke_once(&conn, action, &params).await {
                Ok(output) => {
                    return DispatchOutcome::Succeeded { attempts, output };
                }
                Err(err) => err,
            };

            tracing::warn!(
                task = %task.name,
                target = %task.target,
                kind = %err.kind,
                attempt = attempts,
                error = %err.message,
                "Action attempt failed"
            );

            if !err.is_transient() {
                return DispatchOutcome::Failed {
                    attempts,
                    error: AgentError::Permanent(err),
                };
            }
            if !self.retry.should_retry(attempts) {
                return DispatchOutcome::Failed {
                    attempts,
                    error: AgentError::Transient { attempts, source: err },
                };
            }

            let delay = self.retry.delay_for(attempts, err.retry_after);
            tracing::debug!(task = %task.name, delay_ms = delay.as_millis() as u64, "Backing off");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_requested(stop) => {
                    tracing::info!(task = %task.name, attempt = attempts, "Stop requested during backoff");
                    return DispatchOutcome::Interrupted { attempts, last_error: err };
                }
            }
        }
    }
}

/// Resolves once the stop flag is set.
///
/// Never resolves if the sender is gone without having requested a stop.
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ActionDescriptor, ActionParameter, Connection, ConnectionState, ParamType};
    use crate::tasks::TaskTarget;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `kind` for the first `failures` calls, then succeeds.
    struct FlakyConnection {
        calls: Arc<AtomicU32>,
        failures: u32,
        kind: ActionErrorKind,
        configured: bool,
    }

    impl FlakyConnection {
        fn new(failures: u32, kind: ActionErrorKind) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    calls: calls.clone(),
                    failures,
                    kind,
                    configured: true,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Connection for FlakyConnection {
        fn name(&self) -> &str {
            "flaky"
        }

        fn list_actions(&self) -> Vec<ActionDescriptor> {
            vec![ActionDescriptor::new("send", "Send a message").with_param(ActionParameter::required(
                "count",
                ParamType::Integer,
                "How many",
            ))]
        }

        fn state(&self) -> ConnectionState {
            if self.configured {
                ConnectionState::Configured
            } else {
                ConnectionState::Unconfigured
            }
        }

        async fn perform_action(&self, _action: &str, params: &Params) -> std::result::Result<Value, ActionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(ActionError::new(self.kind, format!("failure {}", n)))
            } else {
                Ok(json!({"sent": params.get("count").cloned()}))
            }
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(5), Duration::from_millis(20), 2.0)
    }

    fn dispatcher(conn: FlakyConnection, max_attempts: u32) -> Dispatcher {
        let mut registry = ConnectionRegistry::new();
        registry.register_connection(conn);
        Dispatcher::new(Arc::new(registry)).with_retry(fast_retry(max_attempts))
    }

    fn task() -> Task {
        Task::new("send", 1.0, TaskTarget::new("flaky", "send")).with_param("count", json!("2"))
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let (conn, calls) = FlakyConnection::new(2, ActionErrorKind::Network);
        let dispatcher = dispatcher(conn, 3);
        let (_tx, mut stop) = watch::channel(false);

        let outcome = dispatcher.dispatch(&task(), &mut stop).await;
        match outcome {
            DispatchOutcome::Succeeded { attempts, output } => {
                assert_eq!(attempts, 3);
                // "2" was coerced to an integer during validation
                assert_eq!(output, json!({"sent": 2}));
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (conn, calls) = FlakyConnection::new(u32::MAX, ActionErrorKind::RateLimited);
        let dispatcher = dispatcher(conn, 2);
        let (_tx, mut stop) = watch::channel(false);

        let outcome = dispatcher.dispatch(&task(), &mut stop).await;
        assert!(outcome.is_failure());
        assert_eq!(outcome.attempts(), 2);
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed { error: AgentError::Transient { attempts: 2, .. }, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let (conn, calls) = FlakyConnection::new(u32::MAX, ActionErrorKind::InvalidCredentials);
        let dispatcher = dispatcher(conn, 5);
        let (_tx, mut stop) = watch::channel(false);

        let outcome = dispatcher.dispatch(&task(), &mut stop).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { attempts: 1, error: AgentError::Permanent(_) }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_connection_is_skipped() {
        let (mut conn, calls) = FlakyConnection::new(0, ActionErrorKind::Network);
        conn.configured = false;
        let dispatcher = dispatcher(conn, 3);
        let (_tx, mut stop) = watch::channel(false);

        let outcome = dispatcher.dispatch(&task(), &mut stop).await;
        assert!(matches!(outcome, DispatchOutcome::Skipped { ref error } if error.is_configuration()));
        assert!(!outcome.is_failure());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_params_are_skipped() {
        let (conn, calls) = FlakyConnection::new(0, ActionErrorKind::Network);
        let dispatcher = dispatcher(conn, 3);
        let (_tx, mut stop) = watch::channel(false);

        let bad = Task::new("send", 1.0, TaskTarget::new("flaky", "send")).with_param("count", json!("many"));
        let outcome = dispatcher.dispatch(&bad, &mut stop).await;
        assert!(matches!(outcome, DispatchOutcome::Skipped { error: AgentError::Validation { .. } }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_during_backoff_interrupts() {
        let (conn, calls) = FlakyConnection::new(u32::MAX, ActionErrorKind::Unavailable);
        let mut registry = ConnectionRegistry::new();
        registry.register_connection(conn);
        let dispatcher = Dispatcher::new(Arc::new(registry)).with_retry(RetryPolicy::new(
            5,
            Duration::from_secs(30),
            Duration::from_secs(30),
            2.0,
        ));
        let (tx, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move { dispatcher.dispatch(&task(), &mut stop).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("dispatch should stop promptly")
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Interrupted { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct SlowConnection;

    #[async_trait]
    impl Connection for SlowConnection {
        fn name(&self) -> &str {
            "slow"
        }

        fn list_actions(&self) -> Vec<ActionDescriptor> {
            vec![ActionDescriptor::new("wait", "Never returns in time")]
        }

        fn state(&self) -> ConnectionState {
            ConnectionState::Configured
        }

        async fn perform_action(&self, _action: &str, _params: &Params) -> std::result::Result<Value, ActionError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_invoke_timeout_is_transient() {
        let mut registry = ConnectionRegistry::new();
        registry.register_connection(SlowConnection);
        let dispatcher = Dispatcher::new(Arc::new(registry))
            .with_retry(RetryPolicy::no_retry())
            .with_invoke_timeout(Duration::from_millis(20));
        let (_tx, mut stop) = watch::channel(false);

        let task = Task::new("wait", 1.0, TaskTarget::new("slow", "wait"));
        let outcome = dispatcher.dispatch(&task, &mut stop).await;
        match outcome {
            DispatchOutcome::Failed {
                error: AgentError::Transient { source, .. },
                ..
            } => assert_eq!(source.kind, ActionErrorKind::Timeout),
            other => panic!("expected timeout failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_requested_ignores_dropped_sender() {
        let (tx, mut stop) = watch::channel(false);
        drop(tx);
        let waited = tokio::time::timeout(Duration::from_millis(20), stop_requested(&mut stop)).await;
        assert!(waited.is_err());
    }
}
