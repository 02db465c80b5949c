use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;

mod cli;

use agentloop::adapters;
use agentloop::agent::{Agent, LoadedAgent};
use agentloop::config::{self, AgentDescriptor, EngineConfig, GlobalConfig};
use agentloop::scheduler::{AgentRuntime, DispatchOutcome, LoopStatus, Scheduler};
use cli::Cli;
use cli::commands::Commands;

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(env!("CARGO_PKG_NAME"))
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join(format!("{}.log", env!("CARGO_PKG_NAME")));

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let env = env_logger::Env::default().default_filter_or(level.unwrap_or("info"));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn load_descriptor(name: &str, config: &GlobalConfig) -> Result<AgentDescriptor> {
    let path = config.agent_path(name);
    AgentDescriptor::load(&path).wrap_err_with(|| format!("Failed to load agent from {}", path.display()))
}

async fn load_agent(name: &str, config: &GlobalConfig, engine: &EngineConfig) -> Result<LoadedAgent> {
    let descriptor = load_descriptor(name, config)?;
    let loaded = Agent::load(&descriptor, engine)
        .await
        .wrap_err_with(|| format!("Failed to load agent '{}'", descriptor.name))?;
    for rejected in &loaded.rejected {
        println!("{} {}: {}", "Excluded task".yellow(), rejected.name, rejected.error);
    }
    Ok(loaded)
}

fn print_outcome(task: &str, outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Succeeded { attempts, output } => {
            println!("{} {} ({} attempt(s))", "Success:".green(), task, attempts);
            if let Ok(pretty) = serde_json::to_string_pretty(output) {
                println!("{}", pretty);
            }
        }
        DispatchOutcome::Failed { attempts, error } => {
            println!("{} {} after {} attempt(s): {}", "Failed:".red(), task, attempts, error);
        }
        DispatchOutcome::Skipped { error } => {
            println!("{} {}: {}", "Skipped:".yellow(), task, error);
        }
        DispatchOutcome::Interrupted { attempts, last_error } => {
            println!(
                "{} {} after {} attempt(s): {}",
                "Interrupted:".yellow(),
                task,
                attempts,
                last_error
            );
        }
    }
}

fn print_status(status: &LoopStatus) {
    println!("{} {}", "Agent:".green(), status.agent);
    println!("  Iterations: {}", status.iteration_count);
    println!("  Last task: {}", status.last_task.as_deref().unwrap_or("-"));
    if let Some(outcome) = &status.last_outcome {
        println!("  Last outcome: {}", outcome);
    }
    if status.failure_counts.is_empty() {
        println!("  Failures: none");
    } else {
        println!("  Failures:");
        for (task, count) in &status.failure_counts {
            println!("    {}: {}", task, count);
        }
    }
    if let Some(reason) = &status.halted {
        println!("  {} {}", "Halted:".red(), reason);
    }
}

async fn handle_run_command(name: &str, config: &GlobalConfig) -> Result<()> {
    let loaded = load_agent(name, config, &config.engine).await?;
    info!("Running agent '{}'", loaded.agent.name);
    println!(
        "{} {} ({} tasks, delay {:?})",
        "Running:".cyan(),
        loaded.agent.name,
        loaded.agent.tasks.len(),
        loaded.agent.loop_delay
    );

    let mut runtime = AgentRuntime::new(loaded.agent, &config.engine);
    let mut status = runtime.subscribe();
    runtime.start_loop()?;

    let mut printed = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Stopping, waiting for the current action...".yellow());
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.iteration_count > printed {
                    printed = current.iteration_count;
                    println!(
                        "[{}] {} {}",
                        current.iteration_count,
                        current.last_task.as_deref().unwrap_or("-").bold(),
                        current.last_outcome.as_deref().unwrap_or("no eligible task")
                    );
                }
                if current.halted.is_some() {
                    break;
                }
            }
        }
    }

    let final_status = runtime.stop_loop().await.context("Loop halted")?;
    print_status(&final_status);
    Ok(())
}

async fn handle_action_command(name: &str, task: &str, config: &GlobalConfig) -> Result<()> {
    let loaded = load_agent(name, config, &config.engine).await?;
    let mut runtime = AgentRuntime::new(loaded.agent, &config.engine);
    let outcome = runtime.run_single_action(task).await?;
    print_outcome(task, &outcome);
    Ok(())
}

async fn handle_check_command(name: &str, config: &GlobalConfig) -> Result<()> {
    let engine = EngineConfig {
        strict_tasks: false,
        ..config.engine.clone()
    };
    let loaded = load_agent(name, config, &engine).await?;
    let scheduler = Scheduler::new(loaded.agent, &engine);
    let agent = scheduler.agent();

    println!("{} {}", "Agent:".green(), agent.name);
    println!("  Loop delay: {:?} (+ up to {:?})", agent.loop_delay, agent.loop_jitter);
    println!(
        "  Time-based weights: {}",
        if agent.policy.enabled { "enabled" } else { "disabled" }
    );
    for rule in agent.policy.rules() {
        println!(
            "    {} x{} on [{}] hours {}-{}",
            rule.name,
            rule.factor,
            rule.patterns().join(", "),
            rule.window.hours.start,
            rule.window.hours.end
        );
    }

    println!("  Tasks:");
    for (task, weight) in agent.tasks.tasks().iter().zip(scheduler.effective_weights()) {
        println!(
            "    {} -> {} (weight {}, effective {:.2})",
            task.name.bold(),
            task.target,
            task.weight,
            weight
        );
    }
    if loaded.rejected.is_empty() {
        println!("{}", "All tasks valid".green());
    } else {
        println!("{} {} task(s) rejected", "Warning:".yellow(), loaded.rejected.len());
    }
    Ok(())
}

async fn handle_connections_command(name: &str, config: &GlobalConfig) -> Result<()> {
    let descriptor = load_descriptor(name, config)?;
    let registry = adapters::build_registry(&descriptor.config).await?;
    println!("{}", "Connections:".cyan());
    for status in registry.list().await {
        let state = if status.configured {
            status.state.to_string().green()
        } else {
            status.state.to_string().red()
        };
        let llm = if status.is_llm_provider { " [llm]" } else { "" };
        println!("  {}{}: {}", status.name.bold(), llm, state);
    }
    Ok(())
}

async fn handle_actions_command(name: &str, connection: &str, config: &GlobalConfig) -> Result<()> {
    let descriptor = load_descriptor(name, config)?;
    let registry = adapters::build_registry(&descriptor.config).await?;
    let actions = registry.list_actions(connection).await?;
    println!("{} {}", "Actions for".cyan(), connection.bold());
    for action in actions {
        println!("  {}: {}", action.name.bold(), action.description);
        for param in &action.parameters {
            let flag = if param.required { "required" } else { "optional" };
            println!("    {} ({}, {}) {}", param.name, param.param_type, flag, param.description);
        }
    }
    Ok(())
}

fn handle_agents_command(config: &GlobalConfig) -> Result<()> {
    let agents = config::list_agents(&config.agents_dir)?;
    if agents.is_empty() {
        println!("No agents found in {}", config.agents_dir.display());
        return Ok(());
    }
    println!("{}", "Agents:".cyan());
    for path in agents {
        match AgentDescriptor::load(&path) {
            Ok(descriptor) => println!("  {} ({} tasks)", descriptor.name.bold(), descriptor.tasks.len()),
            Err(e) => println!("  {} {}", path.display(), format!("invalid: {}", e).red()),
        }
    }
    Ok(())
}

async fn run_application(cli: &Cli, config: &GlobalConfig) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run { agent } => handle_run_command(agent, config).await,
        Commands::Action { agent, task } => handle_action_command(agent, task, config).await,
        Commands::Check { agent } => handle_check_command(agent, config).await,
        Commands::Connections { agent } => handle_connections_command(agent, config).await,
        Commands::Actions { agent, connection } => handle_actions_command(agent, connection, config).await,
        Commands::Agents => handle_agents_command(config),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = GlobalConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging
    let level = if cli.is_verbose() { Some("debug") } else { config.log_level.as_deref() };
    setup_logging(level).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
