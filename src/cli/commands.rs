//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: run an agent's loop until Ctrl-C
//! - action: run one task once
//! - check: validate an agent and show effective weights
//! - connections/actions: inspect the connection catalog
//! - agents: list agent descriptors

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// agentloop - weighted task scheduler for autonomous agents
#[derive(Parser, Debug)]
#[command(name = "agentloop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an agent's loop until interrupted
    Run {
        /// Agent name or descriptor path
        agent: String,
    },

    /// Run a single task once, outside the loop
    Action {
        /// Agent name or descriptor path
        agent: String,

        /// Task name
        task: String,
    },

    /// Validate an agent and show its effective weights
    Check {
        /// Agent name or descriptor path
        agent: String,
    },

    /// List connections and their configuration state
    Connections {
        /// Agent name or descriptor path
        agent: String,
    },

    /// List the actions of a connection
    Actions {
        /// Agent name or descriptor path
        agent: String,

        /// Connection name
        connection: String,
    },

    /// List agent descriptors
    Agents,
}
