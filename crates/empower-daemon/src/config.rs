//! Configuration file management.

use std::path::PathBuf;

use empower_oracle::config::EngineConfig;
use empower_oracle::milestone::MilestoneTarget;
use serde::{Deserialize, Serialize};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Round cadence and the projects to aggregate.
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Consensus engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between consensus rounds for each project.
    #[serde(default = "default_round_interval")]
    pub round_interval_secs: u64,
    /// Seconds between history cleanups.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Seconds between health summaries.
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    /// Projects to aggregate.
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

/// One project driven by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project identifier passed to the engine.
    pub id: String,
    /// Next milestone to watch for, in micro-units.
    #[serde(default)]
    pub milestone: Option<MilestoneTarget>,
}

// Default value functions

fn default_log_level() -> String {
    "info".to_string()
}

fn default_round_interval() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    3600
}

fn default_health_interval() -> u64 {
    600
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            round_interval_secs: default_round_interval(),
            cleanup_interval_secs: default_cleanup_interval(),
            health_interval_secs: default_health_interval(),
            projects: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the config file location.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content)?
        } else {
            Self::default()
        };
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.engine.validate()?;
        anyhow::ensure!(
            config.schedule.round_interval_secs > 0,
            "schedule.round_interval_secs must be at least 1"
        );
        anyhow::ensure!(
            config.schedule.cleanup_interval_secs > 0,
            "schedule.cleanup_interval_secs must be at least 1"
        );
        anyhow::ensure!(
            config.schedule.health_interval_secs > 0,
            "schedule.health_interval_secs must be at least 1"
        );
        Ok(config)
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        // Check env var override first
        if let Ok(path) = std::env::var("EMPOWER_CONFIG") {
            return PathBuf::from(path);
        }
        PathBuf::from("empower.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.schedule.round_interval_secs, 300);
        assert!(config.schedule.projects.is_empty());
        assert_eq!(config.engine.consensus.min_sources, 2);
    }

    #[test]
    fn test_parse_projects() {
        let config = DaemonConfig::parse(
            r#"
[schedule]
round_interval_secs = 60

[[schedule.projects]]
id = "solar-farm-7"

[[schedule.projects]]
id = "wind-2"
milestone = { kwh_target = 5000000, co2_target = 1000000 }

[engine.consensus]
min_sources = 3
"#,
        )
        .expect("parse");
        assert_eq!(config.schedule.round_interval_secs, 60);
        assert_eq!(config.schedule.projects.len(), 2);
        assert!(config.schedule.projects[0].milestone.is_none());
        assert_eq!(
            config.schedule.projects[1].milestone.as_ref().map(|m| m.kwh_target),
            Some(5_000_000)
        );
        assert_eq!(config.engine.consensus.min_sources, 3);
    }

    #[test]
    fn test_parse_rejects_zero_interval() {
        assert!(DaemonConfig::parse("[schedule]\nround_interval_secs = 0\n").is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = DaemonConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let _parsed = DaemonConfig::parse(&toml_str).expect("parse");
    }
}
