//! # empower-oracle
//!
//! Oracle consensus aggregation for EmpowerGrid projects.
//!
//! Independent oracle providers report energy produced (kWh) and carbon
//! offset (CO₂) for a project. A consensus round fetches one reading from
//! every enabled provider concurrently, rejects statistical outliers, and
//! produces a single confidence-weighted [`reading::AggregatedReading`]
//! that callers use to decide whether milestone funds may be released.
//!
//! ## Modules
//!
//! - [`provider`] — Provider records and trust-state transitions
//! - [`registry`] — In-memory provider registry
//! - [`reading`] — Raw and aggregated readings, provider wire payload
//! - [`fetcher`] — Bounded-time fetch against a single provider
//! - [`consensus`] — Weighted, outlier-filtered consensus calculation
//! - [`history`] — Short-lived per-project reading history
//! - [`manager`] — Round orchestration and health diagnostics
//! - [`config`] — TOML engine configuration
//! - [`milestone`] — Milestone gating on consensus totals

pub mod config;
pub mod consensus;
pub mod fetcher;
pub mod history;
pub mod manager;
pub mod milestone;
pub mod provider;
pub mod reading;
pub mod registry;

pub use consensus::{calculate_consensus, ConsensusConfig, ConsensusUpdate};
pub use fetcher::{FetchError, HttpReadingSource, ReadingFetcher, ReadingSource};
pub use manager::{HealthStatus, OracleManager};
pub use provider::{OracleProvider, ProviderUpdate};
pub use reading::{AggregatedReading, OracleReading};
pub use registry::ProviderRegistry;

/// Error types for oracle engine operations.
///
/// Provider fetch failures are deliberately absent: they are absorbed by the
/// round and surface only as registry trust updates (see [`FetchError`]).
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// A provider was submitted without a name.
    #[error("provider name must not be empty")]
    EmptyProviderName,

    /// No provider is registered under the given name.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// A configuration value is outside its permitted range.
    #[error("invalid config: {field} {reason}")]
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Configuration could not be parsed.
    #[error("config parse error: {0}")]
    Config(String),

    /// The HTTP client could not be constructed.
    #[error("http client error: {0}")]
    HttpClient(String),

    /// A reading without consensus was offered where consensus is required.
    #[error("reading did not reach consensus")]
    NoConsensus,

    /// Accumulated metric totals overflowed.
    #[error("numerical overflow")]
    NumericalOverflow,
}

/// Convenience result type for oracle operations.
pub type Result<T> = std::result::Result<T, OracleError>;

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
