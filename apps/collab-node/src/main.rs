//! Command-line host for the change engine.
//!
//! Opens the durable change store under the data directory and submits,
//! lists or undoes changes against it. `demo` runs two in-process client
//! sessions to show broadcast, echo suppression and reconnect replay.

mod demo;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use collab_core::model::{AssemblySnapshot, Role, User};
use collab_core::{ChangeFilter, EngineConfig, InMemoryBus};
use collab_server::ChangeService;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Command-line arguments for the change engine host.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for the change log and snapshots
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import an assembly snapshot (JSON) outside the change log
    Import {
        file: PathBuf,
    },
    /// Submit changes from a JSON-lines file, one change per line
    Submit {
        file: PathBuf,
        /// Acting user
        #[arg(long)]
        user: String,
        /// Register this user as admin before submitting
        #[arg(long)]
        bootstrap_admin: Option<String>,
    },
    /// List committed changes, newest first
    Log {
        #[arg(long)]
        assembly: Option<String>,
        #[arg(long)]
        type_name: Option<String>,
        /// Case-insensitive substring of the submitting user
        #[arg(long)]
        user: Option<String>,
    },
    /// Submit the inverse of a logged change
    Undo {
        #[arg(long)]
        entry: Uuid,
        #[arg(long)]
        user: String,
    },
    /// Run two in-memory client sessions against one service
    Demo,
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides()?;
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn open_service(mut config: EngineConfig) -> Result<ChangeService> {
    config.persist = true;
    let bus = Arc::new(InMemoryBus::new(config.channel_capacity));
    ChangeService::new(config, bus).context("Failed to open change store")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;

    match args.command {
        Command::Import { file } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let snapshot: AssemblySnapshot = serde_json::from_str(&raw)?;
            let service = open_service(config)?;
            service.import_assembly(&snapshot)?;
            service.flush()?;
        }
        Command::Submit {
            file,
            user,
            bootstrap_admin,
        } => {
            let service = open_service(config)?;
            if let Some(admin) = bootstrap_admin {
                service.register_user(User::new(admin, Role::Admin))?;
            }
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let mut rejected = 0;
            for (index, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let payload: serde_json::Value = serde_json::from_str(line)
                    .with_context(|| format!("Line {} is not valid JSON", index + 1))?;
                match service.submit_json(&payload, &user, "") {
                    Ok(entry) => print_json(&entry)?,
                    Err(e) => {
                        error!(line = index + 1, error = %e, "Change rejected");
                        rejected += 1;
                    }
                }
            }
            service.flush()?;
            if rejected > 0 {
                bail!("{} change(s) rejected", rejected);
            }
        }
        Command::Log {
            assembly,
            type_name,
            user,
        } => {
            let service = open_service(config)?;
            let filter = ChangeFilter {
                assembly,
                type_name,
                user,
            };
            for entry in service.find_changes(&filter) {
                print_json(&entry)?;
            }
        }
        Command::Undo { entry, user } => {
            let service = open_service(config)?;
            let undone = service.undo(entry, &user)?;
            info!(reverts = %entry, sequence = undone.sequence, "Change undone");
            print_json(&undone)?;
            service.flush()?;
        }
        Command::Demo => demo::run(config).await?,
    }

    Ok(())
}
