//! Periodic round scheduling.
//!
//! One task per project, so rounds for the same project never overlap,
//! plus one task each for history cleanup and health summaries.

use std::sync::Arc;
use std::time::Duration;

use empower_oracle::milestone::ProjectMetrics;
use empower_oracle::OracleManager;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::{ProjectConfig, ScheduleConfig};

/// Spawn every scheduled task onto a [`JoinSet`]. Dropping the set aborts them.
pub fn spawn_all(manager: Arc<OracleManager>, schedule: &ScheduleConfig) -> JoinSet<()> {
    let mut tasks = JoinSet::new();
    let round_interval = Duration::from_secs(schedule.round_interval_secs);

    for project in schedule.projects.iter().cloned() {
        tasks.spawn(run_project(manager.clone(), project, round_interval));
    }
    tasks.spawn(run_cleanup(
        manager.clone(),
        Duration::from_secs(schedule.cleanup_interval_secs),
    ));
    tasks.spawn(run_health(
        manager,
        Duration::from_secs(schedule.health_interval_secs),
    ));
    tasks
}

async fn run_project(manager: Arc<OracleManager>, project: ProjectConfig, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut metrics = ProjectMetrics::default();
    let mut milestone_reported = false;

    loop {
        ticker.tick().await;
        let Some(reading) = manager.get_aggregated_reading(&project.id).await else {
            continue;
        };
        if !reading.consensus {
            continue;
        }

        match serde_json::to_string(&reading) {
            Ok(json) => info!(project = %project.id, reading = %json, "aggregated reading"),
            Err(e) => error!(project = %project.id, error = %e, "failed to encode reading"),
        }

        if let Err(e) = metrics.apply(&reading) {
            warn!(project = %project.id, error = %e, "metrics not updated");
            continue;
        }

        if let Some(target) = &project.milestone {
            if !milestone_reported && target.is_met(&metrics) {
                milestone_reported = true;
                info!(
                    project = %project.id,
                    kwh_total = metrics.kwh_total,
                    co2_total = metrics.co2_total,
                    "milestone targets reached"
                );
            }
        }
    }
}

async fn run_cleanup(manager: Arc<OracleManager>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        manager.cleanup_old_readings().await;
    }
}

async fn run_health(manager: Arc<OracleManager>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let status = manager.get_health_status().await;
        info!(
            total = status.total_providers,
            enabled = status.enabled_providers,
            healthy = status.healthy_providers,
            average_reputation = status.average_reputation,
            "provider health"
        );
    }
}
