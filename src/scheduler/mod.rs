//! Scheduler/dispatcher engine.
//!
//! This module provides:
//! - **Weighted selection**: prefix-sum draw over effective task weights.
//! - **Retry policy**: exponential backoff for transient action failures.
//! - **Dispatcher**: VALIDATE → INVOKE → RETRY for one task.
//! - **Scheduler**: the per-agent loop and its state.
//! - **AgentRuntime**: start/stop/status command surface.
//!
//! # Example
//!
//! ```ignore
//! use agentloop::scheduler::AgentRuntime;
//!
//! let mut runtime = AgentRuntime::new(agent, &config.engine);
//! runtime.start_loop()?;
//! // ...
//! let status = runtime.stop_loop().await?;
//! ```

mod backoff;
mod dispatch;
mod engine;
mod runtime;
mod select;
mod state;

pub use backoff::RetryPolicy;
pub use dispatch::{DEFAULT_INVOKE_TIMEOUT, DispatchOutcome, Dispatcher};
pub use engine::{Iteration, LoopCommand, Scheduler};
pub use runtime::AgentRuntime;
pub use select::WeightedSelector;
pub use state::{LoopState, LoopStatus};
