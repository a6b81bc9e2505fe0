//! # hivemind
//!
//! Runs the swarm coordination engine in-process with the demo skills.
//!
//! - `hivemind run --owner <id> --objective <text>` decomposes the objective,
//!   runs executors and a validator until every task is finished or waiting
//!   on a reviewer, then prints the owner's status report as JSON.
//! - `hivemind config` prints the effective configuration as YAML.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use hivemind_core::config::SwarmConfig;
use hivemind_core::domain::OwnerId;
use hivemind_core::observability::{LogFormat, init_logging};
use hivemind_core::{StatusReport, Swarm, SwarmBuilder};

mod skills;

const STATUS_POLL: Duration = Duration::from_millis(200);

/// Swarm coordination engine
#[derive(Parser)]
#[command(name = "hivemind")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log output format (pretty, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins
    #[arg(long, global = true, env = "HIVEMIND_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decompose an objective and run it to a settled state
    Run {
        /// Owner (account or campaign) the work is done for
        #[arg(long)]
        owner: String,

        /// Free-text objective, e.g. "Create 3 posts about our new blend"
        #[arg(long)]
        objective: String,

        /// Override the owner's budget allowance for this window
        #[arg(long)]
        allowance: Option<f64>,

        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format, &cli.log_level);

    let config = SwarmConfig::load_or_default(cli.config).context("failed to load configuration")?;

    match cli.command {
        Commands::Run {
            owner,
            objective,
            allowance,
            timeout_secs,
        } => {
            let report = run(config, OwnerId::new(owner), &objective, allowance, timeout_secs).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Config => {
            print!("{}", config.to_yaml().context("failed to render configuration")?);
        }
    }
    Ok(())
}

async fn run(
    config: SwarmConfig,
    owner: OwnerId,
    objective: &str,
    allowance: Option<f64>,
    timeout_secs: u64,
) -> Result<StatusReport> {
    let swarm = skills::register_all(SwarmBuilder::with_config(config))?
        .expect_planner_kinds()
        .build()
        .context("failed to build the swarm")?;

    if let Some(allowance) = allowance {
        swarm.set_allowance(&owner, allowance).await?;
    }

    let tasks = swarm
        .decompose(objective, &owner)
        .await
        .with_context(|| format!("failed to decompose objective for {owner}"))?;
    info!(owner = %owner, tasks = tasks.len(), "objective decomposed");

    swarm.start_owner(&owner).await;
    swarm.start_reaper().await;
    let report = wait_until_settled(&swarm, &owner, Duration::from_secs(timeout_secs)).await;
    swarm.shutdown().await;

    let report = report?;
    if !report.is_settled() {
        warn!(owner = %owner, timeout_secs, "stopped before every task settled");
    }
    Ok(report)
}

async fn wait_until_settled(swarm: &Swarm, owner: &OwnerId, timeout: Duration) -> Result<StatusReport> {
    let deadline = Instant::now() + timeout;
    loop {
        let report = swarm.status(owner).await?;
        if report.is_settled() || Instant::now() >= deadline {
            return Ok(report);
        }
        sleep(STATUS_POLL).await;
    }
}
