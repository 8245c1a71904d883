//! Headless runner for the HMI communication core.
//!
//! Loads a configuration (and optionally a project file), starts polling the
//! active device and prints variable values on its own refresh timer until
//! Ctrl+C.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hmi_modbus::args::RunnerArgs;
use hmi_modbus::{CommHandle, CommService, HmiConfig, ProjectState, VariableRegistry, modbus_factory};
use tokio::time::Interval;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = RunnerArgs::parse();

    let mut config = HmiConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if let Some(path) = &args.project {
        let project = ProjectState::load(path)
            .with_context(|| format!("Failed to load project from {:?}", path))?;
        config.communication = project.communication;
        config.variables = project.variables;
        config.validate().context("Invalid project")?;
    }

    let mut log_config = config.logging.clone();
    if let Some(level) = &args.log_level {
        log_config.level = level.clone();
    }
    hmi_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting hmi-modbus");
    info!("Loaded configuration from {:?}", args.config);

    let registry = Arc::new(VariableRegistry::from_records(&config.variables)?);
    let connection = config.communication.active_connection()?;
    let handle = CommService::spawn(
        config.poll.clone(),
        connection.clone(),
        registry.clone(),
        modbus_factory(),
    );

    info!(
        variables = registry.len(),
        interval_ms = config.poll.interval_ms,
        "Communication service ready"
    );

    match &connection {
        Some(conn) => {
            info!(endpoint = %conn.endpoint, unit_id = conn.unit_id, "Starting communication");
            if let Err(e) = handle.start().await {
                warn!(error = %e, "Initial connect failed, retrying in the background");
            }
        }
        None => warn!("No active protocol block, communication not started"),
    }

    let mut watch = args.watch_interval().map(tokio::time::interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            _ = next_refresh(&mut watch) => print_values(&handle),
        }
    }

    info!("Received shutdown signal");
    handle.stop().await?;
    handle.shutdown().await?;
    info!("hmi-modbus stopped");

    Ok(())
}

async fn next_refresh(watch: &mut Option<Interval>) {
    match watch {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn print_values(handle: &CommHandle) {
    let status = handle.status();
    let now = chrono::Local::now().format("%H:%M:%S%.3f");

    match &status.last_error {
        Some(error) => println!("[{}] {} ({})", now, status.state, error),
        None => println!("[{}] {}", now, status.state),
    }

    for var in handle.variables() {
        let fault = var.fault.as_deref().map(|f| format!("  !{}", f)).unwrap_or_default();
        println!(
            "  {:<20} {:>16}@{:<5} = {}{}",
            var.name,
            var.kind.as_str(),
            var.address,
            var.value,
            fault
        );
    }
}
