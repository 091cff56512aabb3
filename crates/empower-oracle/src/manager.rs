//! Round orchestration and health diagnostics.
//!
//! The [`OracleManager`] is the single coordinating owner of the provider
//! registry, the reading history and the consensus policy. A round:
//!
//! 1. Snapshots the enabled providers under the state lock.
//! 2. Releases the lock and fetches from every provider concurrently.
//! 3. Waits for every fetch to finish or hit its own deadline.
//! 4. Re-acquires the lock once to record every outcome and store the
//!    round in the history.
//!
//! The round takes as long as the slowest provider deadline, not the sum.
//! Overlapping rounds for the same project are not serialized; the later
//! one to finish owns the history entry.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::{self, JoinSet};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::consensus::{calculate_consensus, ConsensusConfig, ConsensusUpdate};
use crate::fetcher::{FetchOutcome, HttpReadingSource, ReadingFetcher, ReadingSource};
use crate::history::{HistoryEntry, ReadingHistory};
use crate::provider::{OracleProvider, ProviderHealthState, ProviderUpdate};
use crate::reading::{AggregatedReading, OracleReading};
use crate::registry::ProviderRegistry;
use crate::{now_millis, Result};

/// Aggregate provider health for observability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// All registered providers.
    pub total_providers: usize,
    /// Providers taking part in rounds.
    pub enabled_providers: usize,
    /// Enabled providers with no failures or a success in the last 5 minutes.
    pub healthy_providers: usize,
    /// Mean reputation of enabled providers; 0 when none are enabled.
    pub average_reputation: f64,
    /// Unix millis when this status was computed.
    pub last_update: u64,
    /// Per-provider detail, ordered by name.
    pub providers: Vec<ProviderHealth>,
}

/// Health detail for one provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    /// Provider name.
    pub name: String,
    /// Whether the provider takes part in rounds.
    pub enabled: bool,
    /// Classification by failure streak.
    pub state: ProviderHealthState,
    /// Current trust score.
    pub reputation: u8,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Unix millis of the last successful fetch.
    pub last_success: Option<u64>,
    /// Unix millis of the last failed fetch.
    pub last_failure: Option<u64>,
}

impl From<&OracleProvider> for ProviderHealth {
    fn from(p: &OracleProvider) -> Self {
        Self {
            name: p.name.clone(),
            enabled: p.enabled,
            state: p.health_state(),
            reputation: p.reputation,
            consecutive_failures: p.consecutive_failures,
            last_success: p.last_success,
            last_failure: p.last_failure,
        }
    }
}

/// State guarded by the manager's single lock.
#[derive(Debug)]
struct ManagerState {
    registry: ProviderRegistry,
    history: ReadingHistory,
    consensus: ConsensusConfig,
}

/// Coordinates consensus rounds across all enabled providers.
pub struct OracleManager {
    state: Mutex<ManagerState>,
    fetcher: ReadingFetcher,
    history_retention_ms: u64,
}

impl OracleManager {
    /// Build a manager that fetches through `source`.
    ///
    /// # Errors
    ///
    /// Any validation error from `config`.
    pub fn new(config: &EngineConfig, source: Arc<dyn ReadingSource>) -> Result<Self> {
        config.validate()?;
        let registry = ProviderRegistry::with_providers(config.initial_providers())?;
        Ok(Self {
            state: Mutex::new(ManagerState {
                registry,
                history: ReadingHistory::new(),
                consensus: config.consensus.clone(),
            }),
            fetcher: ReadingFetcher::new(source),
            history_retention_ms: config.history_retention_ms(),
        })
    }

    /// Build a manager that fetches over HTTP.
    pub fn with_http(config: &EngineConfig) -> Result<Self> {
        Self::new(config, Arc::new(HttpReadingSource::new()?))
    }

    /// Fetch one reading from every enabled provider concurrently.
    ///
    /// Failed providers contribute nothing. The collected readings, possibly
    /// none, replace the project's history entry.
    pub async fn fetch_all_readings(&self, project_id: &str) -> Vec<OracleReading> {
        let providers: Vec<OracleProvider> = {
            let state = self.state.lock().await;
            state.registry.enabled().cloned().collect()
        };

        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<task::Id, String> = HashMap::with_capacity(providers.len());
        for provider in providers {
            let fetcher = self.fetcher.clone();
            let name = provider.name.clone();
            let handle = tasks.spawn(async move { fetcher.fetch(&provider).await });
            in_flight.insert(handle.id(), name);
        }

        let mut outcomes: Vec<FetchOutcome> = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, outcome)) => outcomes.push(outcome),
                Err(e) => {
                    let Some(provider) = in_flight.remove(&e.id()) else {
                        continue;
                    };
                    warn!(project = project_id, provider = %provider, error = %e, "oracle fetch task aborted");
                    outcomes.push(FetchOutcome::aborted(provider, e.to_string()));
                }
            }
        }
        outcomes.sort_by(|a, b| a.provider.cmp(&b.provider));

        let mut state = self.state.lock().await;
        let readings: Vec<OracleReading> = outcomes
            .into_iter()
            .filter_map(|outcome| outcome.apply(&mut state.registry))
            .collect();
        state.history.record(project_id, readings.clone(), now_millis());
        readings
    }

    /// Run a full round and compute consensus.
    ///
    /// Returns `None` when no readings were collected or fewer than
    /// `min_sources`. A populated result with `consensus = false` must not
    /// be acted on.
    pub async fn get_aggregated_reading(&self, project_id: &str) -> Option<AggregatedReading> {
        let readings = self.fetch_all_readings(project_id).await;
        if readings.is_empty() {
            warn!(project = project_id, "no oracle readings collected");
            return None;
        }

        let config = self.get_consensus_config().await;
        let Some(aggregated) = calculate_consensus(&readings, &config, now_millis()) else {
            warn!(
                project = project_id,
                collected = readings.len(),
                required = config.min_sources,
                "insufficient oracle sources"
            );
            return None;
        };

        if aggregated.consensus {
            info!(
                project = project_id,
                kwh = aggregated.kwh,
                co2 = aggregated.co2,
                confidence = aggregated.confidence,
                sources = aggregated.sources.len(),
                outliers = aggregated.outlier_sources.len(),
                "oracle consensus reached"
            );
        } else {
            warn!(
                project = project_id,
                confidence = aggregated.confidence,
                sources = aggregated.sources.len(),
                outliers = ?aggregated.outlier_sources,
                "oracle consensus not reached"
            );
        }
        Some(aggregated)
    }

    /// Provider health as of now.
    pub async fn get_health_status(&self) -> HealthStatus {
        self.health_status_at(now_millis()).await
    }

    /// Provider health as of `now` (Unix millis).
    pub async fn health_status_at(&self, now: u64) -> HealthStatus {
        let state = self.state.lock().await;
        let enabled: Vec<&OracleProvider> = state.registry.enabled().collect();
        let average_reputation = if enabled.is_empty() {
            0.0
        } else {
            enabled.iter().map(|p| f64::from(p.reputation)).sum::<f64>() / enabled.len() as f64
        };

        HealthStatus {
            total_providers: state.registry.len(),
            enabled_providers: enabled.len(),
            healthy_providers: enabled.iter().filter(|p| p.is_healthy(now)).count(),
            average_reputation,
            last_update: now,
            providers: state.registry.all().map(ProviderHealth::from).collect(),
        }
    }

    /// Drop history entries older than the retention window.
    pub async fn cleanup_old_readings(&self) -> usize {
        self.cleanup_old_readings_at(now_millis()).await
    }

    /// Drop history entries older than the retention window at `now`.
    pub async fn cleanup_old_readings_at(&self, now: u64) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.history.prune(now, self.history_retention_ms);
        if removed > 0 {
            info!(removed, remaining = state.history.len(), "pruned oracle reading history");
        }
        removed
    }

    /// The last round stored for `project_id`.
    pub async fn get_reading_history(&self, project_id: &str) -> Option<HistoryEntry> {
        self.state.lock().await.history.get(project_id).cloned()
    }

    /// Insert or replace a provider. Replacing resets its trust state.
    pub async fn add_provider(&self, provider: OracleProvider) -> Result<()> {
        self.state.lock().await.registry.add(provider)
    }

    /// Remove a provider; unknown names are ignored.
    pub async fn remove_provider(&self, name: &str) -> Option<OracleProvider> {
        self.state.lock().await.registry.remove(name)
    }

    /// Merge partial fields into a provider.
    pub async fn update_provider(&self, name: &str, update: &ProviderUpdate) -> Result<()> {
        self.state.lock().await.registry.update(name, update)
    }

    /// A snapshot of one provider's record.
    pub async fn get_provider(&self, name: &str) -> Option<OracleProvider> {
        self.state.lock().await.registry.get(name).cloned()
    }

    /// Every registered provider, ordered by name.
    pub async fn providers(&self) -> Vec<OracleProvider> {
        self.state.lock().await.registry.all().cloned().collect()
    }

    /// Apply a partial consensus update for all later rounds.
    ///
    /// # Errors
    ///
    /// [`OracleError::InvalidConfig`](crate::OracleError::InvalidConfig) if
    /// the merged policy is invalid; the current policy is kept.
    pub async fn update_consensus_config(&self, update: &ConsensusUpdate) -> Result<ConsensusConfig> {
        let mut state = self.state.lock().await;
        let merged = state.consensus.merged(update);
        merged.validate()?;
        info!(?merged, "consensus config updated");
        state.consensus = merged.clone();
        Ok(merged)
    }

    /// The policy the next round will use.
    pub async fn get_consensus_config(&self) -> ConsensusConfig {
        self.state.lock().await.consensus.clone()
    }
}
