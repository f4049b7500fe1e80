//! Command-line interface for fleetwire.
//!
//! `serve` boots the device communication subsystem and feeds it decoded
//! requests read from stdin, one JSON object per line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use fleetwire_core::config::FleetwireConfig;
use fleetwire_core::logging::init_logging;
use fleetwire_core::model::{DeviceSpecification, Site};
use fleetwire_core::{DeviceEventManagement, DeviceManagement};
use fleetwire_devices::{CommunicationContext, DecodedDeviceRequest, DeviceCommunication};
use fleetwire_storage::{MemoryDeviceStore, RedbDeviceStore};

/// Fleetwire device communication service.
#[derive(Parser, Debug)]
#[command(name = "fleetwire")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process decoded device requests read from stdin.
    Serve {
        /// Configuration file; defaults are used when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Create this site if it does not exist.
        #[arg(long = "site")]
        sites: Vec<String>,
        /// Create this standalone specification if it does not exist.
        #[arg(long = "specification")]
        specifications: Vec<String>,
    },
    /// Validate a configuration file and print the effective settings.
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
}

type Stores = (Arc<dyn DeviceManagement>, Arc<dyn DeviceEventManagement>);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    match args.command {
        Command::Serve {
            config,
            sites,
            specifications,
        } => serve(config, sites, specifications).await,
        Command::CheckConfig { config } => check_config(config),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<FleetwireConfig> {
    match path {
        Some(path) => FleetwireConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let mut config = FleetwireConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = load_config(Some(path))?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn open_stores(config: &FleetwireConfig) -> Result<Stores> {
    match &config.storage.path {
        Some(path) => {
            let store = Arc::new(
                RedbDeviceStore::open(path)
                    .with_context(|| format!("Failed to open store at {}", path))?,
            );
            let management: Arc<dyn DeviceManagement> = store.clone();
            let events: Arc<dyn DeviceEventManagement> = store;
            Ok((management, events))
        }
        None => {
            tracing::info!("No storage path configured, using in-memory store");
            let store = Arc::new(MemoryDeviceStore::new());
            let management: Arc<dyn DeviceManagement> = store.clone();
            let events: Arc<dyn DeviceEventManagement> = store;
            Ok((management, events))
        }
    }
}

fn seed(
    management: &dyn DeviceManagement,
    sites: &[String],
    specifications: &[String],
) -> Result<()> {
    for token in sites {
        if management.get_site(token)?.is_none() {
            management.create_site(Site::new(token.as_str(), token.as_str()))?;
            tracing::info!(site = %token, "Created site");
        }
    }
    for token in specifications {
        if management.get_device_specification(token)?.is_none() {
            management.create_device_specification(DeviceSpecification::new(
                token.as_str(),
                token.as_str(),
            ))?;
            tracing::info!(specification = %token, "Created device specification");
        }
    }
    Ok(())
}

async fn serve(
    config_path: Option<PathBuf>,
    sites: Vec<String>,
    specifications: Vec<String>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let (management, events) = open_stores(&config)?;
    seed(management.as_ref(), &sites, &specifications)?;

    let context = CommunicationContext::builder(management, events)
        .with_config(&config)
        .build();
    let communication = DeviceCommunication::new(context, &config);
    communication
        .start()
        .context("Failed to start device communication")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0usize;
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else { break };
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let request: DecodedDeviceRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(line = line_number, "Skipping undecodable request: {}", e);
                continue;
            }
        };
        if let Err(e) = communication.enqueue(request).await {
            tracing::error!("Failed to enqueue request: {}", e);
            break;
        }
    }

    // Let queued requests finish before stopping
    while communication.metrics().backlog > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    communication.stop().await;
    println!("{}", communication.metrics());
    Ok(())
}
