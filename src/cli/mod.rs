//! CLI module for agentloop - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running agents and
//! inspecting their connections.

pub mod commands;

pub use commands::Cli;
