//! Straylight — governance spine for an autonomous agent runtime.
//!
//! Single binary hosting the tool orchestrator, economy, autonomy loop,
//! and the authenticated HTTP surface.

use std::io::Read as _;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use straylight::autonomy::explain;
use straylight::config::StraylightConfig;
use straylight::logging;
use straylight::runtime::Runtime;
use straylight::server;
use straylight::types::Envelope;

/// Command-line interface.
#[derive(Debug, Parser)]
#[command(name = "straylight", version, about = "Cognitive orchestrator runtime")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available subcommands; `serve` is the default.
#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP surface, queue worker, and autonomy heartbeat.
    Serve,
    /// Read an envelope JSON from stdin, invoke it, print the result.
    Invoke,
    /// Print a narrative of the latest autonomy decision.
    Explain,
    /// Print the current economy snapshot as JSON.
    Budget,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Invoke => invoke().await,
        Command::Explain => explain_latest(),
        Command::Budget => budget().await,
    }
}

/// Long-running mode: HTTP surface + worker + optional autonomy loop.
async fn serve() -> Result<()> {
    let config = StraylightConfig::load()?;
    let _logging_guard = logging::init_production(&config.data_dir().join("logs"))?;

    let mut runtime = Runtime::build(config).await?;

    if runtime.config.policy.worker {
        let _ = runtime.start_worker();
        info!("queue worker running");
    }
    if runtime.config.autonomy.enabled {
        let _ = runtime.start_autonomy();
        info!(
            interval_secs = runtime.config.autonomy.heartbeat_seconds,
            "autonomy loop running"
        );
    }

    let bind = runtime.config.server.bind.clone();
    server::serve(runtime.server_state(), &bind).await
}

/// One-shot invocation: envelope JSON on stdin, result JSON on stdout.
async fn invoke() -> Result<()> {
    logging::init_cli();
    let config = StraylightConfig::load()?;

    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read stdin")?;
    if raw.trim().is_empty() {
        anyhow::bail!("no input received for orchestration");
    }
    let envelope: Envelope =
        serde_json::from_str(&raw).context("invalid tool invocation envelope")?;

    let runtime = Runtime::build(config).await?;
    let result = runtime.orchestrator.invoke(&envelope).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

/// Print the latest autonomy explanation as prose.
fn explain_latest() -> Result<()> {
    logging::init_cli();
    let config = StraylightConfig::load()?;
    let latest = explain::read_latest(config.explain_path());
    println!("{}", explain::format_narrative(latest.as_ref()));
    Ok(())
}

/// Print the economy snapshot.
async fn budget() -> Result<()> {
    logging::init_cli();
    let config = StraylightConfig::load()?;
    let runtime = Runtime::build(config).await?;
    let snapshot = runtime.orchestrator.budget_snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
