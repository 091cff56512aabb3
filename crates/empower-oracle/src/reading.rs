//! Raw and aggregated readings, and the provider wire payload.
//!
//! Providers answer a GET with a JSON body:
//!
//! ```text
//! { "ts": <epoch-millis, optional>, "kwh": <number>, "co2": <number>, "raw_wh": <number, optional> }
//! ```
//!
//! Missing or `null` `ts` defaults to the fetch time; missing or `null`
//! `kwh` / `co2` default to zero. A whole-number float `ts` is accepted.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::fetcher::FetchError;
use crate::provider::OracleProvider;

/// One provider's report for one round. Not mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleReading {
    /// Provider name.
    pub source: String,
    /// Provider-reported Unix millis.
    pub timestamp: u64,
    /// Energy delta in kWh.
    pub kwh: f64,
    /// Emissions-avoided delta.
    pub co2: f64,
    /// `reputation / 100` of the provider at fetch time.
    pub confidence: f64,
    /// Provenance details.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// The consensus result for one round.
///
/// `sources` always holds every reading fetched in the round, outliers
/// included; `outlier_sources` names a subset of them. Callers must not act
/// on a result with `consensus = false`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedReading {
    /// Aggregation time, Unix millis.
    pub timestamp: u64,
    /// Confidence-weighted kWh over valid readings.
    pub kwh: f64,
    /// Confidence-weighted CO₂ over valid readings.
    pub co2: f64,
    /// Mean confidence of valid readings.
    pub confidence: f64,
    /// Every reading considered this round.
    pub sources: Vec<OracleReading>,
    /// Whether the round is trustworthy enough to act on.
    pub consensus: bool,
    /// Providers excluded as statistical outliers.
    pub outlier_sources: Vec<String>,
}

/// Body returned by a provider endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderPayload {
    /// Provider-side measurement time, Unix millis.
    #[serde(default, deserialize_with = "millis_or_null")]
    pub ts: Option<u64>,
    /// Energy delta in kWh.
    #[serde(default, deserialize_with = "number_or_null")]
    pub kwh: f64,
    /// Emissions-avoided delta.
    #[serde(default, deserialize_with = "number_or_null")]
    pub co2: f64,
    /// Raw meter value in Wh, kept as provenance.
    #[serde(default)]
    pub raw_wh: Option<f64>,
}

/// Epoch millis as sent on the wire: some providers encode them as floats.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireMillis {
    Integer(u64),
    Float(f64),
}

fn millis_or_null<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<WireMillis>::deserialize(deserializer)? {
        None => Ok(None),
        Some(WireMillis::Integer(ms)) => Ok(Some(ms)),
        Some(WireMillis::Float(ms)) if ms.is_finite() && ms >= 0.0 && ms.fract() == 0.0 && ms < u64::MAX as f64 => {
            Ok(Some(ms as u64))
        }
        Some(WireMillis::Float(ms)) => Err(D::Error::custom(format!(
            "ts must be a non-negative whole number of millis, got {ms}"
        ))),
    }
}

fn number_or_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

impl ProviderPayload {
    /// Parse and validate a response body.
    ///
    /// # Errors
    ///
    /// [`FetchError::Malformed`] if the body is not the expected JSON shape
    /// or a measurement is negative or non-finite.
    pub fn parse(body: &[u8]) -> Result<Self, FetchError> {
        let payload: ProviderPayload =
            serde_json::from_slice(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    fn validate(&self) -> Result<(), FetchError> {
        for (field, value) in [("kwh", Some(self.kwh)), ("co2", Some(self.co2)), ("raw_wh", self.raw_wh)] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(FetchError::Malformed(format!("{field} = {v}")));
                }
            }
        }
        Ok(())
    }

    /// Build the canonical reading for `provider`, fetched at `fetched_at`.
    pub fn into_reading(self, provider: &OracleProvider, fetched_at: u64, attempts: u32) -> OracleReading {
        let mut metadata = BTreeMap::new();
        metadata.insert("endpoint".to_string(), serde_json::json!(provider.endpoint));
        metadata.insert("fetched_at".to_string(), serde_json::json!(fetched_at));
        metadata.insert("attempts".to_string(), serde_json::json!(attempts));
        metadata.insert("reputation".to_string(), serde_json::json!(provider.reputation));
        if let Some(raw_wh) = self.raw_wh {
            metadata.insert("raw_wh".to_string(), serde_json::json!(raw_wh));
        }

        OracleReading {
            source: provider.name.clone(),
            timestamp: self.ts.unwrap_or(fetched_at),
            kwh: self.kwh,
            co2: self.co2,
            confidence: provider.confidence(),
            metadata,
        }
    }
}
