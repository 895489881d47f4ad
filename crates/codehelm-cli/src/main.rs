//! Codehelm CLI — entry point.
//!
//! # Commands
//!
//! - `codehelm agent [-m MESSAGE] [--mode agent|ask] [-w DIR] [--yes]` — single-shot or REPL
//! - `codehelm init` — write a default config and an AGENTS.md template
//! - `codehelm status` — show configuration and provider status

mod helpers;
mod init;
mod repl;
mod status;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use codehelm_agent::{builtin_registry, Agent, AgentMode};
use codehelm_core::bus::EventBus;
use codehelm_core::config::{load_config, AutoApproveConfig, Config};
use codehelm_core::run::RunOutcome;
use codehelm_core::utils::expand_home;
use codehelm_providers::create_provider;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// Codehelm — a coding agent that asks before it touches your files
#[derive(Parser)]
#[command(name = "codehelm", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work on a project with the agent (single-shot or interactive REPL)
    Agent {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// `agent` may edit and run commands; `ask` is read-only
        #[arg(long, default_value = "agent")]
        mode: AgentMode,

        /// Project directory (defaults to the configured workspace)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Approve every tool call without asking
        #[arg(short, long, default_value_t = false)]
        yes: bool,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Write a default config and an AGENTS.md template
    Init,

    /// Show configuration and provider status
    Status,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Agent {
            message,
            mode,
            workspace,
            yes,
            logs,
        } => {
            init_logging(logs);
            run_agent(message, mode, workspace, yes).await
        }
        Commands::Init => init::run(),
        Commands::Status => status::run(),
    }
}

// ─────────────────────────────────────────────
// Agent command
// ─────────────────────────────────────────────

async fn run_agent(message: Option<String>, mode: AgentMode, workspace: Option<PathBuf>, yes: bool) -> Result<()> {
    let config = load_config(None);
    let workspace = resolve_workspace(&config, workspace)?;
    let agent = Arc::new(build_agent(config)?);
    if yes {
        agent.set_auto_approve(AutoApproveConfig::all());
    }

    match message {
        Some(msg) => {
            info!(workspace = %workspace.display(), %mode, "processing single message");
            let report = repl::run_once(&agent, &msg, &workspace, mode)
                .await
                .context("agent run failed to start")?;
            if !matches!(report.outcome, RunOutcome::Completed) {
                std::process::exit(1);
            }
        }
        None => repl::run(agent, workspace, mode).await?,
    }

    Ok(())
}

fn resolve_workspace(config: &Config, flag: Option<PathBuf>) -> Result<PathBuf> {
    let workspace = flag.unwrap_or_else(|| expand_home(&config.agent.workspace));
    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("workspace not found: {}", workspace.display()))?;
    if !workspace.is_dir() {
        anyhow::bail!("workspace is not a directory: {}", workspace.display());
    }
    Ok(workspace)
}

/// Build an `Agent` from the loaded configuration.
pub fn build_agent(config: Config) -> Result<Agent> {
    let provider = create_provider(&config).context("failed to create LLM provider")?;
    let registry = builtin_registry(&config.tools);
    Ok(Agent::new(config, Arc::new(provider), registry, EventBus::default()))
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("codehelm=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
