//! agentloop - weighted task scheduling for autonomous agents
//!
//! An agent periodically picks one of its tasks by weight, dispatches it to a
//! connection (a pluggable adapter over some external platform), retries
//! transient failures, and paces itself before the next pick.

pub mod adapters;
pub mod agent;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod scheduler;
pub mod tasks;

pub use error::{AgentError, Result};
