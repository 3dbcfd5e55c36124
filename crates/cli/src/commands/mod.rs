//! Command implementations.

mod inspect;
mod monitor;
mod record;
mod validate;
mod worker;

pub use inspect::run_inspect;
pub use monitor::run_monitor;
pub use record::run_record;
pub use validate::run_validate;
pub use worker::run_worker;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use contracts::RigBlueprint;
use supervisor::{AcquisitionSupervisor, InProcessLauncher};
use tracing::{info, warn};

/// Load + validate the rig configuration
fn load_blueprint(path: &Path) -> Result<RigBlueprint> {
    info!(config = %path.display(), "Loading configuration");
    if !path.exists() {
        anyhow::bail!("Configuration file not found: {}", path.display());
    }
    config_loader::ConfigLoader::load_from_path(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

fn build_supervisor(blueprint: &RigBlueprint, in_process: bool) -> Result<AcquisitionSupervisor> {
    if blueprint.observability.metrics_port != 0 {
        observability::init_metrics_only(blueprint.observability.metrics_port)?;
    }
    if in_process {
        info!("Running sensor workers in-process");
        return Ok(AcquisitionSupervisor::new(
            blueprint.clone(),
            Arc::new(InProcessLauncher),
        ));
    }
    AcquisitionSupervisor::with_process_launcher(blueprint.clone())
        .context("Failed to set up worker launcher")
}

/// Resolves on the optional deadline, never otherwise
async fn deadline(duration: Option<f64>) {
    match duration {
        Some(secs) if secs.is_finite() && secs >= 0.0 => {
            tokio::time::sleep(Duration::from_secs_f64(secs)).await
        }
        _ => std::future::pending::<()>().await,
    }
}

/// Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
