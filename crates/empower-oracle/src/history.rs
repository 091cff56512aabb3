//! Per-project reading history.
//!
//! Holds the raw readings of the most recent round for each project. This
//! is a diagnostic cache, not a source of truth: a later round overwrites
//! the entry, and [`ReadingHistory::prune`] drops entries once every reading
//! in them is older than the retention window.

use std::collections::HashMap;

use crate::reading::OracleReading;

/// Default retention window in milliseconds (24 hours).
pub const DEFAULT_RETENTION_MS: u64 = 24 * 60 * 60 * 1000;

/// The last round recorded for one project.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    /// Unix millis when the round was stored.
    pub recorded_at: u64,
    /// Every reading collected in that round.
    pub readings: Vec<OracleReading>,
}

impl HistoryEntry {
    /// Whether every reading is older than `cutoff`.
    ///
    /// An empty round is judged by its recording time.
    fn is_expired(&self, cutoff: u64) -> bool {
        if self.readings.is_empty() {
            return self.recorded_at < cutoff;
        }
        self.readings.iter().all(|r| r.timestamp < cutoff)
    }
}

/// Most recent round per project, keyed by project identifier.
#[derive(Clone, Debug, Default)]
pub struct ReadingHistory {
    entries: HashMap<String, HistoryEntry>,
}

impl ReadingHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a round for `project_id`, replacing any earlier one.
    pub fn record(&mut self, project_id: &str, readings: Vec<OracleReading>, now: u64) {
        self.entries.insert(
            project_id.to_string(),
            HistoryEntry {
                recorded_at: now,
                readings,
            },
        );
    }

    /// The last round stored for `project_id`.
    pub fn get(&self, project_id: &str) -> Option<&HistoryEntry> {
        self.entries.get(project_id)
    }

    /// Drop entries whose readings are all older than `retention_ms` at `now`.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&mut self, now: u64, retention_ms: u64) -> usize {
        let cutoff = now.saturating_sub(retention_ms);
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(cutoff));
        before - self.entries.len()
    }

    /// Number of projects with a stored round.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
