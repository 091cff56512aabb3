//! Milestone gating on consensus totals.
//!
//! Project milestones are funded against cumulative kWh and CO₂ targets
//! held as integer micro-units (`value * 1_000_000`). Only readings that
//! reached consensus may move the totals, and a milestone is releasable
//! once both totals reach their targets.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::reading::AggregatedReading;
use crate::{OracleError, Result};

/// Micro-units per whole kWh or CO₂ unit.
pub const MICRO_UNITS: f64 = 1_000_000.0;

/// Convert a measurement to micro-units, rounding to the nearest unit.
///
/// # Errors
///
/// [`OracleError::NumericalOverflow`] if the value does not fit in a `u64`.
pub fn to_micro_units(value: f64) -> Result<u64> {
    let scaled = (value * MICRO_UNITS).round();
    if !scaled.is_finite() || scaled < 0.0 || scaled >= u64::MAX as f64 {
        return Err(OracleError::NumericalOverflow);
    }
    Ok(scaled as u64)
}

/// Running metric totals for one project.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetrics {
    /// Cumulative energy in micro-kWh.
    pub kwh_total: u64,
    /// Cumulative CO₂ offset in micro-units.
    pub co2_total: u64,
}

impl ProjectMetrics {
    /// Add a consensus reading's deltas to the totals.
    ///
    /// The totals are unchanged if any error is returned.
    ///
    /// # Errors
    ///
    /// - [`OracleError::NoConsensus`] if the reading did not reach consensus
    /// - [`OracleError::NumericalOverflow`] if a total would overflow
    pub fn apply(&mut self, reading: &AggregatedReading) -> Result<()> {
        if !reading.consensus {
            return Err(OracleError::NoConsensus);
        }
        let kwh_total = self
            .kwh_total
            .checked_add(to_micro_units(reading.kwh)?)
            .ok_or(OracleError::NumericalOverflow)?;
        let co2_total = self
            .co2_total
            .checked_add(to_micro_units(reading.co2)?)
            .ok_or(OracleError::NumericalOverflow)?;

        self.kwh_total = kwh_total;
        self.co2_total = co2_total;
        debug!(kwh_total, co2_total, "project metrics updated");
        Ok(())
    }
}

/// Targets a project must reach before a milestone payout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneTarget {
    /// Required energy in micro-kWh.
    pub kwh_target: u64,
    /// Required CO₂ offset in micro-units.
    pub co2_target: u64,
}

impl MilestoneTarget {
    /// Whether both totals have reached their targets.
    pub fn is_met(&self, metrics: &ProjectMetrics) -> bool {
        metrics.kwh_total >= self.kwh_target && metrics.co2_total >= self.co2_target
    }
}
