//! Oracle provider records and trust-state transitions.
//!
//! A provider carries operator policy (endpoint, timeout, retries, enabled)
//! and trust state that only the fetch path mutates:
//!
//! ```text
//! success:  consecutive_failures = 0, last_success = now
//! failure:  consecutive_failures += 1, last_failure = now
//!           if consecutive_failures > FAILURE_TOLERANCE:
//!               reputation = max(reputation - REPUTATION_PENALTY, MIN_REPUTATION)
//! ```
//!
//! Successes never raise reputation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lowest reputation a provider can decay to.
pub const MIN_REPUTATION: u8 = 10;

/// Highest reputation a provider can hold.
pub const MAX_REPUTATION: u8 = 100;

/// Reputation lost per failure once the tolerance is exceeded.
pub const REPUTATION_PENALTY: u8 = 5;

/// Consecutive failures tolerated before reputation starts to decay.
pub const FAILURE_TOLERANCE: u32 = 3;

/// Default per-fetch deadline in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Default number of retries inside the fetch deadline.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 2;

/// A provider with a success this recent counts as healthy (5 minutes).
pub const HEALTHY_RECENCY_MS: u64 = 5 * 60 * 1000;

/// One external measurement source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OracleProvider {
    /// Unique registry key.
    pub name: String,
    /// URI the fetcher issues a GET against.
    pub endpoint: String,
    /// Reserved tuning weight in [0, 1]; not used by the consensus math.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Hard deadline for one fetch, retries included.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra attempts made inside the deadline before the fetch fails.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Operator switch; disabled providers are skipped by rounds.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Trust score in [MIN_REPUTATION, MAX_REPUTATION].
    #[serde(default = "default_reputation")]
    pub reputation: u8,
    /// Failures since the last success.
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Unix millis of the last successful fetch.
    #[serde(default)]
    pub last_success: Option<u64>,
    /// Unix millis of the last failed fetch.
    #[serde(default)]
    pub last_failure: Option<u64>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_true() -> bool {
    true
}

fn default_reputation() -> u8 {
    MAX_REPUTATION
}

/// Health classification derived from consecutive failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderHealthState {
    /// No failures since the last success.
    Healthy,
    /// Between 1 and [`FAILURE_TOLERANCE`] consecutive failures.
    Degraded,
    /// More than [`FAILURE_TOLERANCE`] consecutive failures; reputation decays.
    Unhealthy,
}

/// Partial provider fields merged by [`OracleProvider::apply`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderUpdate {
    /// New fetch URI.
    pub endpoint: Option<String>,
    /// New reserved tuning weight.
    pub weight: Option<f64>,
    /// New fetch deadline in milliseconds.
    pub timeout_ms: Option<u64>,
    /// New retry count.
    pub retry_attempts: Option<u32>,
    /// Enable or disable the provider.
    pub enabled: Option<bool>,
    /// Override the trust score (clamped).
    pub reputation: Option<u8>,
    /// Override the failure streak.
    pub consecutive_failures: Option<u32>,
    /// Override the last success time, Unix millis.
    pub last_success: Option<u64>,
    /// Override the last failure time, Unix millis.
    pub last_failure: Option<u64>,
}

impl OracleProvider {
    /// Create an enabled provider with full reputation and default policy.
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            weight: default_weight(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            enabled: true,
            reputation: MAX_REPUTATION,
            consecutive_failures: 0,
            last_success: None,
            last_failure: None,
        }
    }

    /// Set the starting reputation (clamped).
    pub fn with_reputation(mut self, reputation: u8) -> Self {
        self.reputation = clamp_reputation(reputation);
        self
    }

    /// Set the fetch deadline.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the number of retries inside the deadline.
    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    /// Set whether the provider takes part in rounds.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The fetch deadline as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Confidence assigned to this provider's readings: `reputation / 100`.
    pub fn confidence(&self) -> f64 {
        f64::from(self.reputation) / 100.0
    }

    /// Record a successful fetch at `now` (Unix millis).
    pub fn record_success(&mut self, now: u64) {
        self.last_success = Some(now);
        self.consecutive_failures = 0;
    }

    /// Record a failed fetch at `now` (Unix millis).
    ///
    /// Returns `true` if the failure cost the provider reputation.
    pub fn record_failure(&mut self, now: u64) -> bool {
        self.last_failure = Some(now);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.consecutive_failures <= FAILURE_TOLERANCE {
            return false;
        }

        let decayed = self
            .reputation
            .saturating_sub(REPUTATION_PENALTY)
            .max(MIN_REPUTATION);
        let changed = decayed != self.reputation;
        self.reputation = decayed;
        changed
    }

    /// Classify the provider by its consecutive failure count.
    pub fn health_state(&self) -> ProviderHealthState {
        match self.consecutive_failures {
            0 => ProviderHealthState::Healthy,
            n if n <= FAILURE_TOLERANCE => ProviderHealthState::Degraded,
            _ => ProviderHealthState::Unhealthy,
        }
    }

    /// Whether the provider counts as healthy at `now`.
    ///
    /// Healthy means no consecutive failures, or a success within
    /// [`HEALTHY_RECENCY_MS`].
    pub fn is_healthy(&self, now: u64) -> bool {
        self.consecutive_failures == 0
            || self
                .last_success
                .is_some_and(|at| now.saturating_sub(at) < HEALTHY_RECENCY_MS)
    }

    /// Merge the set fields of `update` into this record.
    pub fn apply(&mut self, update: &ProviderUpdate) {
        if let Some(endpoint) = &update.endpoint {
            self.endpoint.clone_from(endpoint);
        }
        if let Some(weight) = update.weight {
            self.weight = weight;
        }
        if let Some(timeout_ms) = update.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
        if let Some(retry_attempts) = update.retry_attempts {
            self.retry_attempts = retry_attempts;
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(reputation) = update.reputation {
            self.reputation = clamp_reputation(reputation);
        }
        if let Some(failures) = update.consecutive_failures {
            self.consecutive_failures = failures;
        }
        if let Some(at) = update.last_success {
            self.last_success = Some(at);
        }
        if let Some(at) = update.last_failure {
            self.last_failure = Some(at);
        }
    }
}

/// Clamp a reputation into `[MIN_REPUTATION, MAX_REPUTATION]`.
pub fn clamp_reputation(reputation: u8) -> u8 {
    reputation.clamp(MIN_REPUTATION, MAX_REPUTATION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OracleProvider {
        OracleProvider::new("meter", "http://127.0.0.1:9/reading")
    }

    #[test]
    fn test_new_provider_defaults() {
        let p = provider();
        assert!(p.enabled);
        assert_eq!(p.reputation, MAX_REPUTATION);
        assert_eq!(p.consecutive_failures, 0);
        assert_eq!(p.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert!((p.confidence() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failures_within_tolerance_keep_reputation() {
        let mut p = provider().with_reputation(90);
        for t in 0..FAILURE_TOLERANCE {
            assert!(!p.record_failure(u64::from(t)));
        }
        assert_eq!(p.reputation, 90);
        assert_eq!(p.consecutive_failures, FAILURE_TOLERANCE);
        assert_eq!(p.health_state(), ProviderHealthState::Degraded);
    }

    #[test]
    fn test_fourth_failure_costs_one_penalty() {
        let mut p = provider().with_reputation(90);
        for t in 0..4 {
            p.record_failure(t);
        }
        assert_eq!(p.reputation, 85);
        assert_eq!(p.consecutive_failures, 4);
        assert_eq!(p.last_failure, Some(3));
        assert_eq!(p.health_state(), ProviderHealthState::Unhealthy);
    }

    #[test]
    fn test_reputation_floor() {
        let mut p = provider().with_reputation(12);
        for t in 0..50 {
            p.record_failure(t);
            assert!(p.reputation >= MIN_REPUTATION);
        }
        assert_eq!(p.reputation, MIN_REPUTATION);
        assert!(!p.record_failure(51));
    }

    #[test]
    fn test_success_resets_failures_but_not_reputation() {
        let mut p = provider().with_reputation(50);
        for t in 0..6 {
            p.record_failure(t);
        }
        // Failures 4, 5 and 6 each cost one penalty.
        assert_eq!(p.reputation, 35);

        p.record_success(100);
        assert_eq!(p.consecutive_failures, 0);
        assert_eq!(p.last_success, Some(100));
        assert_eq!(p.reputation, 35);
        assert_eq!(p.health_state(), ProviderHealthState::Healthy);
    }

    #[test]
    fn test_is_healthy_recent_success() {
        let mut p = provider();
        p.record_success(1_000);
        p.record_failure(2_000);
        assert!(p.is_healthy(1_000 + HEALTHY_RECENCY_MS - 1));
        assert!(!p.is_healthy(1_000 + HEALTHY_RECENCY_MS));
    }

    #[test]
    fn test_apply_merges_and_clamps() {
        let mut p = provider();
        p.apply(&ProviderUpdate {
            enabled: Some(false),
            timeout_ms: Some(250),
            reputation: Some(200),
            ..Default::default()
        });
        assert!(!p.enabled);
        assert_eq!(p.timeout_ms, 250);
        assert_eq!(p.reputation, MAX_REPUTATION);
        assert_eq!(p.endpoint, "http://127.0.0.1:9/reading");

        p.apply(&ProviderUpdate {
            reputation: Some(0),
            ..Default::default()
        });
        assert_eq!(p.reputation, MIN_REPUTATION);
    }

    #[test]
    fn test_provider_toml_defaults() {
        let p: OracleProvider =
            toml::from_str("name = \"a\"\nendpoint = \"http://a\"\n").expect("parse provider");
        assert_eq!(p.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(p.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(p.reputation, MAX_REPUTATION);
        assert!(p.enabled);
    }
}
