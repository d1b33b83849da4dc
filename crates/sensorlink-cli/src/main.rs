//! Command-line interface for the sensor bridge.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sensorlink_core::config::env_vars;
use sensorlink_core::{LogLevel, ServiceConfig};
use sensorlink_devices::SensorService;
use sensorlink_storage::{create_store, StoreBackend};

mod shutdown;

/// Sensor bridge between the drivers bus and the sensor record store.
#[derive(Parser, Debug)]
#[command(name = "sensorlink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform. Defaults to `run`.
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file (JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the service until interrupted.
    Run,
    /// Print stored sensor records as JSON lines and exit.
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(LogLevel::Info, args.verbose);
            tracing::error!("Cannot parse configuration file: {:#}", e);
            return Err(e);
        }
    };
    init_logging(config.log_level(), args.verbose);

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_service(config).await,
        Command::List => list_records(&config),
    }
}

/// Read the configuration file, or start from defaults plus environment.
fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    match path {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => {
            let mut config = ServiceConfig::default();
            config.apply_overrides(|key| std::env::var(key).ok());
            config.validate()?;
            Ok(config)
        }
    }
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(level: LogLevel, verbose: bool) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let directive = if verbose {
        LogLevel::Debug.as_directive()
    } else {
        level.as_directive()
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .without_time()
            .compact()
            .init();
    }
}

async fn run_service(config: ServiceConfig) -> Result<()> {
    let service = match SensorService::initialize(config).await {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::error!("Error during service connection: {}", e);
            return Err(e.into());
        }
    };

    let stopper = service.clone();
    tokio::spawn(async move {
        shutdown::shutdown_signal().await;
        stopper.stop().await;
    });

    service.run().await;
    Ok(())
}

fn list_records(config: &ServiceConfig) -> Result<()> {
    let store = create_store(&StoreBackend::from_config(config)).context("failed to open store")?;
    for record in store.fetch_all()? {
        println!("{}", serde_json::to_string(&record)?);
    }
    store.close()?;
    Ok(())
}
