//! empower-daemon: drives oracle consensus rounds for EmpowerGrid projects.
//!
//! Single OS process running a Tokio async runtime. Each configured project
//! gets a consensus round on a fixed cadence; results are logged for the
//! downstream settlement layer.

mod config;
mod scheduler;

use std::sync::Arc;

use empower_oracle::OracleManager;
use tracing::{info, warn};

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // 2. Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("empower={}", config.logging.level).parse()?),
        )
        .init();

    info!("EmpowerGrid oracle daemon starting");

    // 3. Build the engine
    let manager = Arc::new(OracleManager::with_http(&config.engine)?);
    let status = manager.get_health_status().await;
    info!(
        providers = status.total_providers,
        enabled = status.enabled_providers,
        projects = config.schedule.projects.len(),
        "oracle engine ready"
    );
    if config.schedule.projects.is_empty() {
        warn!("no projects configured; only cleanup and health tasks will run");
    }

    // 4. Run scheduled rounds until shutdown
    let mut tasks = scheduler::spawn_all(manager, &config.schedule);
    tokio::select! {
        Some(joined) = tasks.join_next() => {
            warn!(result = ?joined, "scheduler task exited");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    tasks.shutdown().await;
    info!("Daemon stopped");
    Ok(())
}
