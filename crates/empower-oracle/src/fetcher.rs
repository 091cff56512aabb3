//! Bounded-time fetch against a single provider.
//!
//! A fetch makes up to `1 + retry_attempts` attempts, all inside the
//! provider's single `timeout` deadline. The call never fails: its
//! [`FetchOutcome`] carries either a reading or the error that ended it,
//! and [`FetchOutcome::apply`] turns that into exactly one success or one
//! failure on the provider's registry record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::provider::OracleProvider;
use crate::reading::{OracleReading, ProviderPayload};
use crate::registry::ProviderRegistry;
use crate::{now_millis, OracleError};

/// Idle keep-alive for pooled provider connections.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Why a single provider produced no reading this round.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// The deadline elapsed before any attempt succeeded.
    #[error("timed out after {timeout_ms} ms")]
    Timeout {
        /// The provider deadline that elapsed.
        timeout_ms: u64,
    },

    /// The endpoint answered with a non-2xx status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// Connection, TLS or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The body was not a valid reading payload.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The fetch task panicked or was cancelled before reporting.
    #[error("fetch task aborted: {0}")]
    Aborted(String),
}

/// Where provider payloads come from.
///
/// [`HttpReadingSource`] is the production implementation; tests substitute
/// in-memory sources.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    /// Perform one attempt against `provider`.
    async fn fetch(&self, provider: &OracleProvider) -> Result<ProviderPayload, FetchError>;
}

/// Fetches payloads with an HTTP GET against `provider.endpoint`.
#[derive(Clone, Debug)]
pub struct HttpReadingSource {
    client: reqwest::Client,
}

impl HttpReadingSource {
    /// Build a source with a pooled client.
    ///
    /// # Errors
    ///
    /// [`OracleError::HttpClient`] if the TLS backend cannot be initialized.
    pub fn new() -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .user_agent(concat!("empower-oracle/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OracleError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReadingSource for HttpReadingSource {
    async fn fetch(&self, provider: &OracleProvider) -> Result<ProviderPayload, FetchError> {
        let response = self
            .client
            .get(&provider.endpoint)
            .timeout(provider.timeout())
            .send()
            .await
            .map_err(|e| transport_error(e, provider))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, provider))?;
        ProviderPayload::parse(&body)
    }
}

fn transport_error(err: reqwest::Error, provider: &OracleProvider) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            timeout_ms: provider.timeout_ms,
        }
    } else {
        FetchError::Transport(err.to_string())
    }
}

/// The result of one fetch call against one provider.
#[derive(Clone, Debug)]
pub struct FetchOutcome {
    /// Provider the fetch targeted.
    pub provider: String,
    /// Unix millis when the fetch completed.
    pub completed_at: u64,
    /// The reading, or the error that ended the last attempt.
    pub result: Result<OracleReading, FetchError>,
}

impl FetchOutcome {
    /// A failed outcome for a fetch task that never reported back.
    pub fn aborted(provider: String, reason: String) -> Self {
        Self {
            provider,
            completed_at: now_millis(),
            result: Err(FetchError::Aborted(reason)),
        }
    }

    /// Record this outcome on the provider's registry entry.
    ///
    /// Returns the reading on success. A provider removed while the fetch
    /// was in flight keeps no record, but its reading is still returned.
    pub fn apply(self, registry: &mut ProviderRegistry) -> Option<OracleReading> {
        let Some(provider) = registry.get_mut(&self.provider) else {
            debug!(provider = %self.provider, "fetch outcome for unregistered provider");
            return self.result.ok();
        };

        match self.result {
            Ok(reading) => {
                provider.record_success(self.completed_at);
                Some(reading)
            }
            Err(err) => {
                let decayed = provider.record_failure(self.completed_at);
                warn!(
                    provider = %provider.name,
                    error = %err,
                    consecutive_failures = provider.consecutive_failures,
                    "oracle fetch failed"
                );
                if decayed {
                    warn!(
                        provider = %provider.name,
                        reputation = provider.reputation,
                        "provider reputation decayed"
                    );
                }
                None
            }
        }
    }
}

/// Performs bounded-time fetches through a [`ReadingSource`].
#[derive(Clone)]
pub struct ReadingFetcher {
    source: Arc<dyn ReadingSource>,
}

impl ReadingFetcher {
    /// Create a fetcher over `source`.
    pub fn new(source: Arc<dyn ReadingSource>) -> Self {
        Self { source }
    }

    /// Fetch one reading from `provider`, retrying inside its deadline.
    pub async fn fetch(&self, provider: &OracleProvider) -> FetchOutcome {
        let deadline = provider.timeout();
        let attempts = tokio::time::timeout(deadline, self.attempt(provider)).await;
        let completed_at = now_millis();

        let result = match attempts {
            Ok(Ok((payload, attempts))) => {
                let reading = payload.into_reading(provider, completed_at, attempts);
                debug!(
                    provider = %provider.name,
                    kwh = reading.kwh,
                    co2 = reading.co2,
                    attempts,
                    "oracle reading fetched"
                );
                Ok(reading)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(FetchError::Timeout {
                timeout_ms: provider.timeout_ms,
            }),
        };

        FetchOutcome {
            provider: provider.name.clone(),
            completed_at,
            result,
        }
    }

    async fn attempt(&self, provider: &OracleProvider) -> Result<(ProviderPayload, u32), FetchError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.source.fetch(provider).await {
                Ok(payload) => return Ok((payload, attempts)),
                Err(err) if attempts > provider.retry_attempts => return Err(err),
                Err(err) => {
                    debug!(provider = %provider.name, attempt = attempts, error = %err, "retrying oracle fetch");
                }
            }
        }
    }
}
