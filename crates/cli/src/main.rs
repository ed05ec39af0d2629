use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use forgeflow_core::query::execution_status;
use forgeflow_core::workflow::WorkflowDag;
use forgeflow_core::{ExecutionId, StepKey};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

mod config;
mod simulate;

use config::CliConfig;
use simulate::WorkflowFile;

#[derive(Parser, Debug)]
#[command(name = "forgeflow")]
#[command(about = "Workflow validation and execution tracking", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "forgeflow.toml", env = "FORGEFLOW_CONFIG")]
    config: PathBuf,

    /// Data directory for storage
    #[arg(short, long, default_value = "./data", env = "FORGEFLOW_DATA_DIR")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that a workflow file forms a valid step DAG
    Validate {
        /// Workflow file (.json or .toml)
        workflow: PathBuf,
    },

    /// Track a dry run of a workflow and persist its snapshots
    Simulate {
        /// Workflow file (.json or .toml)
        workflow: PathBuf,

        /// Step keys to mark as failed
        #[arg(long = "fail")]
        fail: Vec<String>,
    },

    /// Show the persisted status of an execution
    Status {
        /// Execution ID
        execution_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forgeflow=info,forgeflow_core=info".into()),
        )
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();
    let config = CliConfig::load(&args.config, args.data_dir)?;

    match args.command {
        Command::Validate { workflow } => {
            let file = WorkflowFile::load(&workflow)?;
            let dag = WorkflowDag::build(&file.steps)
                .with_context(|| format!("Workflow {} is invalid", file.workflow_id))?;

            if dag.is_empty() {
                println!("Workflow {} is valid but has no steps", file.workflow_id);
                return Ok(());
            }

            println!("Workflow {} is valid ({} steps)", file.workflow_id, dag.len());
            let entry: Vec<String> = dag
                .entry_steps()
                .into_iter()
                .map(|s| s.step_key.to_string())
                .collect();
            println!("Entry steps: {}", entry.join(", "));

            for (i, step) in dag.topological_order().iter().enumerate() {
                let dependents = dag.dependents(&step.step_key).unwrap_or_default();
                if dependents.is_empty() {
                    println!("  {:>3}. {} ({})", i + 1, step.step_key, step.step_name);
                } else {
                    let dependents: Vec<&str> = dependents.iter().map(|k| k.as_str()).collect();
                    println!(
                        "  {:>3}. {} ({}) -> {}",
                        i + 1,
                        step.step_key,
                        step.step_name,
                        dependents.join(", ")
                    );
                }
            }
        }
        Command::Simulate { workflow, fail } => {
            let file = WorkflowFile::load(&workflow)?;
            let fail: HashSet<StepKey> = fail.into_iter().map(StepKey::new).collect();
            let store = Arc::new(config.open_store()?);

            tracing::info!("Execution store: {}", config.store_path().display());

            let state =
                simulate::simulate(&file, store, config.tracker.clone(), &fail).await?;
            println!("{}", serde_json::to_string_pretty(&state.execution)?);
        }
        Command::Status { execution_id } => {
            let execution_id =
                ExecutionId::parse(&execution_id).context("Invalid execution ID")?;
            let store = config.open_store()?;

            match execution_status(&store, execution_id).await? {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => anyhow::bail!("Execution {} not found", execution_id),
            }
        }
    }

    Ok(())
}
