//! Weighted, outlier-filtered consensus over one round of readings.
//!
//! ```text
//! weighted_mean = sum(value_i * confidence_i) / sum(confidence_i)
//! outlier      <=> |value_i - weighted_mean| > outlier_threshold * stddev
//!                  on either the kWh or the CO₂ dimension
//! ```
//!
//! The standard deviation is the population deviation of the raw values
//! across every reading in the round; with fewer than two readings it is
//! zero. A dimension with zero spread flags nothing.
//!
//! With `n` readings no point can sit more than `sqrt(n - 1)` population
//! deviations from the mean, so a threshold of 2.0 needs at least six
//! readings before an equally-weighted anomaly can be rejected.

use serde::{Deserialize, Serialize};

use crate::reading::{AggregatedReading, OracleReading};
use crate::{OracleError, Result};

/// Tunable consensus policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Minimum readings required to attempt consensus, and to keep after
    /// outlier filtering.
    pub min_sources: usize,
    /// Minimum mean confidence of valid readings, in [0, 1].
    pub required_confidence: f64,
    /// Standard deviations beyond which a reading is excluded.
    pub outlier_threshold: f64,
    /// Minimum fraction of readings that must survive filtering, in [0, 1].
    pub consensus_threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_sources: 2,
            required_confidence: 0.8,
            outlier_threshold: 2.0,
            consensus_threshold: 0.7,
        }
    }
}

/// Partial consensus fields merged by [`ConsensusConfig::merged`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusUpdate {
    /// New [`ConsensusConfig::min_sources`].
    pub min_sources: Option<usize>,
    /// New [`ConsensusConfig::required_confidence`].
    pub required_confidence: Option<f64>,
    /// New [`ConsensusConfig::outlier_threshold`].
    pub outlier_threshold: Option<f64>,
    /// New [`ConsensusConfig::consensus_threshold`].
    pub consensus_threshold: Option<f64>,
}

impl ConsensusConfig {
    /// Check every field against its permitted range.
    ///
    /// # Errors
    ///
    /// [`OracleError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.min_sources == 0 {
            return Err(invalid("min_sources", "must be at least 1"));
        }
        check_fraction("required_confidence", self.required_confidence)?;
        check_fraction("consensus_threshold", self.consensus_threshold)?;
        if !self.outlier_threshold.is_finite() || self.outlier_threshold <= 0.0 {
            return Err(invalid(
                "outlier_threshold",
                format!("must be positive and finite, got {}", self.outlier_threshold),
            ));
        }
        Ok(())
    }

    /// A copy of this config with the set fields of `update` applied.
    pub fn merged(&self, update: &ConsensusUpdate) -> Self {
        Self {
            min_sources: update.min_sources.unwrap_or(self.min_sources),
            required_confidence: update.required_confidence.unwrap_or(self.required_confidence),
            outlier_threshold: update.outlier_threshold.unwrap_or(self.outlier_threshold),
            consensus_threshold: update.consensus_threshold.unwrap_or(self.consensus_threshold),
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> OracleError {
    OracleError::InvalidConfig {
        field,
        reason: reason.into(),
    }
}

fn check_fraction(field: &'static str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, format!("must be within [0, 1], got {value}")))
    }
}

/// Compute the consensus reading for one round.
///
/// Returns `None` when fewer than `min_sources` readings were collected.
/// Otherwise returns a populated result; `consensus` is `true` only when
/// enough readings survive filtering, the surviving fraction reaches
/// `consensus_threshold`, and their mean confidence reaches
/// `required_confidence`.
pub fn calculate_consensus(
    readings: &[OracleReading],
    config: &ConsensusConfig,
    now: u64,
) -> Option<AggregatedReading> {
    if readings.is_empty() || readings.len() < config.min_sources {
        return None;
    }

    let outlier_sources = find_outliers(readings, config.outlier_threshold);
    let valid: Vec<&OracleReading> = readings
        .iter()
        .filter(|r| !outlier_sources.contains(&r.source))
        .collect();

    let kwh = weighted_mean(valid.iter().copied(), |r| r.kwh);
    let co2 = weighted_mean(valid.iter().copied(), |r| r.co2);
    let confidence = if valid.is_empty() {
        0.0
    } else {
        valid.iter().map(|r| r.confidence).sum::<f64>() / valid.len() as f64
    };

    let ratio = valid.len() as f64 / readings.len() as f64;
    let consensus = valid.len() >= config.min_sources
        && ratio >= config.consensus_threshold
        && confidence >= config.required_confidence;

    Some(AggregatedReading {
        timestamp: now,
        kwh,
        co2,
        confidence,
        sources: readings.to_vec(),
        consensus,
        outlier_sources,
    })
}

/// Names of readings that deviate from the weighted mean by more than
/// `threshold` standard deviations on either dimension.
pub fn find_outliers(readings: &[OracleReading], threshold: f64) -> Vec<String> {
    let kwh = Dimension::measure(readings, |r| r.kwh);
    let co2 = Dimension::measure(readings, |r| r.co2);

    readings
        .iter()
        .filter(|r| kwh.is_outlier(r.kwh, threshold) || co2.is_outlier(r.co2, threshold))
        .map(|r| r.source.clone())
        .collect()
}

/// Spread statistics for one measured dimension.
struct Dimension {
    mean: f64,
    std_dev: f64,
}

impl Dimension {
    fn measure(readings: &[OracleReading], value: fn(&OracleReading) -> f64) -> Self {
        let values: Vec<f64> = readings.iter().map(value).collect();
        Self {
            mean: weighted_mean(readings.iter(), value),
            std_dev: population_std_dev(&values),
        }
    }

    fn is_outlier(&self, value: f64, threshold: f64) -> bool {
        self.std_dev > 0.0 && (value - self.mean).abs() > threshold * self.std_dev
    }
}

/// Confidence-weighted mean; zero when the total weight is zero.
///
/// Weights are normalized before multiplying, so a single reading yields
/// its own value exactly.
pub fn weighted_mean<'a>(
    readings: impl Iterator<Item = &'a OracleReading> + Clone,
    value: fn(&OracleReading) -> f64,
) -> f64 {
    let weight: f64 = readings.clone().map(|r| r.confidence).sum();
    if weight == 0.0 {
        return 0.0;
    }
    readings.map(|r| value(r) * (r.confidence / weight)).sum()
}

/// Population standard deviation; zero for fewer than two values.
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn reading(source: &str, kwh: f64, co2: f64, confidence: f64) -> OracleReading {
        OracleReading {
            source: source.to_string(),
            timestamp: 0,
            kwh,
            co2,
            confidence,
            metadata: BTreeMap::new(),
        }
    }

    fn strict_config() -> ConsensusConfig {
        ConsensusConfig {
            min_sources: 3,
            required_confidence: 0.8,
            outlier_threshold: 2.0,
            consensus_threshold: 0.7,
        }
    }

    #[test]
    fn test_agreeing_providers_reach_consensus() {
        let readings = vec![
            reading("a", 100.0, 50.0, 0.9),
            reading("b", 102.0, 50.0, 0.9),
            reading("c", 98.0, 50.0, 0.9),
        ];
        let agg = calculate_consensus(&readings, &strict_config(), 7).expect("result");
        assert!(agg.consensus);
        assert!((agg.kwh - 100.0).abs() < 1e-9);
        assert!((agg.co2 - 50.0).abs() < 1e-9);
        assert!((agg.confidence - 0.9).abs() < 1e-12);
        assert!(agg.outlier_sources.is_empty());
        assert_eq!(agg.sources.len(), 3);
        assert_eq!(agg.timestamp, 7);
    }

    #[test]
    fn test_gross_anomaly_is_rejected() {
        let mut readings: Vec<OracleReading> = (0..5)
            .map(|i| reading(&format!("p{i}"), 100.0 + f64::from(i), 50.0, 0.9))
            .collect();
        readings.push(reading("rogue", 5000.0, 50.0, 0.9));

        let agg = calculate_consensus(&readings, &strict_config(), 0).expect("result");
        assert_eq!(agg.outlier_sources, vec!["rogue".to_string()]);
        assert_eq!(agg.sources.len(), 6);
        assert!(agg.consensus);
        assert!((agg.kwh - 102.0).abs() < 1e-9);
    }

    #[test]
    fn test_three_provider_anomaly_with_tighter_threshold() {
        let readings = vec![
            reading("a", 100.0, 50.0, 0.9),
            reading("b", 102.0, 50.0, 0.9),
            reading("rogue", 5000.0, 50.0, 0.9),
        ];

        // Two survivors fall below min_sources = 3: populated but untrusted.
        let config = ConsensusConfig {
            outlier_threshold: 1.2,
            ..strict_config()
        };
        let agg = calculate_consensus(&readings, &config, 0).expect("result");
        assert_eq!(agg.outlier_sources, vec!["rogue".to_string()]);
        assert!(!agg.consensus);
        assert!((agg.kwh - 101.0).abs() < 1e-9);

        // With min_sources = 2 the survivors carry consensus only if the
        // surviving ratio (2/3) clears the threshold.
        let lenient = ConsensusConfig {
            min_sources: 2,
            consensus_threshold: 0.6,
            ..config
        };
        let agg = calculate_consensus(&readings, &lenient, 0).expect("result");
        assert!(agg.consensus);
    }

    #[test]
    fn test_insufficient_sources_is_none() {
        let readings = vec![reading("a", 1.0, 1.0, 1.0), reading("b", 1.0, 1.0, 1.0)];
        assert!(calculate_consensus(&readings, &strict_config(), 0).is_none());
        assert!(calculate_consensus(&[], &ConsensusConfig::default(), 0).is_none());
    }

    #[test]
    fn test_single_reading_is_exact() {
        let config = ConsensusConfig {
            min_sources: 1,
            required_confidence: 0.5,
            ..Default::default()
        };
        let readings = vec![reading("solo", 123.456, 78.9, 0.6)];
        let agg = calculate_consensus(&readings, &config, 0).expect("result");
        assert_eq!(agg.kwh, 123.456);
        assert_eq!(agg.co2, 78.9);
        assert!(agg.outlier_sources.is_empty());
        assert!(agg.consensus);
    }

    #[test]
    fn test_low_confidence_blocks_consensus() {
        let readings = vec![
            reading("a", 10.0, 1.0, 0.5),
            reading("b", 10.0, 1.0, 0.6),
            reading("c", 10.0, 1.0, 0.7),
        ];
        let agg = calculate_consensus(&readings, &strict_config(), 0).expect("result");
        assert!(!agg.consensus);
        assert!((agg.confidence - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_weighting() {
        let config = ConsensusConfig {
            required_confidence: 0.0,
            outlier_threshold: 10.0,
            ..Default::default()
        };
        let readings = vec![reading("a", 10.0, 0.0, 1.0), reading("b", 20.0, 0.0, 0.25)];
        let agg = calculate_consensus(&readings, &config, 0).expect("result");
        assert!((agg.kwh - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weight_mean_is_zero() {
        let readings = [reading("a", 10.0, 5.0, 0.0), reading("b", 30.0, 5.0, 0.0)];
        assert_eq!(weighted_mean(readings.iter(), |r| r.kwh), 0.0);
    }

    #[test]
    fn test_outlier_on_co2_dimension_only() {
        let mut readings: Vec<OracleReading> = (0..5)
            .map(|i| reading(&format!("p{i}"), 100.0, 40.0 + f64::from(i), 0.9))
            .collect();
        readings.push(reading("co2-rogue", 100.0, 900.0, 0.9));
        assert_eq!(find_outliers(&readings, 2.0), vec!["co2-rogue".to_string()]);
    }

    #[test]
    fn test_outliers_shrink_as_threshold_grows() {
        let readings: Vec<OracleReading> = [3.0, 9.0, 10.0, 10.5, 11.0, 12.0, 30.0, 80.0]
            .iter()
            .enumerate()
            .map(|(i, kwh)| reading(&format!("p{i}"), *kwh, 1.0, 0.5 + i as f64 / 20.0))
            .collect();

        let mut previous = find_outliers(&readings, 0.1);
        for step in 2..40 {
            let current = find_outliers(&readings, f64::from(step) * 0.1);
            assert!(current.iter().all(|name| previous.contains(name)));
            previous = current;
        }
    }

    #[test]
    fn test_outliers_are_subset_of_sources() {
        let readings = vec![
            reading("a", 1.0, 1.0, 0.9),
            reading("b", 1.1, 1.0, 0.9),
            reading("c", 500.0, 1.0, 0.9),
        ];
        let config = ConsensusConfig {
            min_sources: 1,
            outlier_threshold: 0.5,
            ..Default::default()
        };
        let agg = calculate_consensus(&readings, &config, 0).expect("result");
        assert!(agg.outlier_sources.len() <= agg.sources.len());
        for name in &agg.outlier_sources {
            assert!(agg.sources.iter().any(|r| &r.source == name));
        }
    }

    #[test]
    fn test_std_dev_edge_cases() {
        assert_eq!(population_std_dev(&[]), 0.0);
        assert_eq!(population_std_dev(&[42.0]), 0.0);
        assert!((population_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            ConsensusConfig { min_sources: 0, ..Default::default() },
            ConsensusConfig { required_confidence: 1.5, ..Default::default() },
            ConsensusConfig { consensus_threshold: -0.1, ..Default::default() },
            ConsensusConfig { outlier_threshold: 0.0, ..Default::default() },
            ConsensusConfig { outlier_threshold: f64::NAN, ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(OracleError::InvalidConfig { .. })));
        }
        ConsensusConfig::default().validate().expect("default is valid");
    }

    #[test]
    fn test_merged_only_touches_set_fields() {
        let merged = ConsensusConfig::default().merged(&ConsensusUpdate {
            outlier_threshold: Some(3.5),
            ..Default::default()
        });
        assert_eq!(merged.outlier_threshold, 3.5);
        assert_eq!(merged.min_sources, ConsensusConfig::default().min_sources);
    }
}
