//! Engine configuration.
//!
//! ```toml
//! history_retention_secs = 86400
//!
//! [consensus]
//! min_sources = 3
//! outlier_threshold = 2.0
//!
//! [[providers]]
//! name = "site-meter"
//! endpoint = "https://meter.example/v1/reading"
//! timeout_ms = 5000
//! ```

use serde::{Deserialize, Serialize};

use crate::consensus::ConsensusConfig;
use crate::history::DEFAULT_RETENTION_MS;
use crate::provider::OracleProvider;
use crate::registry::seed_providers;
use crate::{OracleError, Result};

/// Everything needed to construct an [`OracleManager`](crate::manager::OracleManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a project's last round stays in the history cache.
    #[serde(default = "default_history_retention_secs")]
    pub history_retention_secs: u64,
    /// Initial providers. Empty = built-in seed set.
    #[serde(default)]
    pub providers: Vec<OracleProvider>,
    /// Consensus policy.
    #[serde(default)]
    pub consensus: ConsensusConfig,
}

fn default_history_retention_secs() -> u64 {
    DEFAULT_RETENTION_MS / 1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_retention_secs: default_history_retention_secs(),
            providers: Vec::new(),
            consensus: ConsensusConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// - [`OracleError::Config`] if the document does not parse
    /// - [`OracleError::InvalidConfig`] if a value is out of range
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| OracleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate consensus policy and provider names.
    pub fn validate(&self) -> Result<()> {
        self.consensus.validate()?;
        if self.providers.iter().any(|p| p.name.is_empty()) {
            return Err(OracleError::EmptyProviderName);
        }
        if self.history_retention_secs == 0 {
            return Err(OracleError::InvalidConfig {
                field: "history_retention_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Configured providers, or the seed set when none are configured.
    pub fn initial_providers(&self) -> Vec<OracleProvider> {
        if self.providers.is_empty() {
            seed_providers()
        } else {
            self.providers.clone()
        }
    }

    /// History retention in milliseconds.
    pub fn history_retention_ms(&self) -> u64 {
        self.history_retention_secs.saturating_mul(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.history_retention_ms(), DEFAULT_RETENTION_MS);
        assert_eq!(config.initial_providers().len(), 3);
        config.validate().expect("default is valid");
    }

    #[test]
    fn test_parse_full_document() {
        let config = EngineConfig::from_toml_str(
            r#"
history_retention_secs = 3600

[consensus]
min_sources = 3
outlier_threshold = 2.5

[[providers]]
name = "a"
endpoint = "http://127.0.0.1:8001/reading"
timeout_ms = 250
retry_attempts = 0

[[providers]]
name = "b"
endpoint = "http://127.0.0.1:8002/reading"
enabled = false
"#,
        )
        .expect("parse");

        assert_eq!(config.history_retention_secs, 3600);
        assert_eq!(config.consensus.min_sources, 3);
        assert_eq!(config.consensus.outlier_threshold, 2.5);
        assert_eq!(config.consensus.required_confidence, 0.8);
        let providers = config.initial_providers();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].timeout_ms, 250);
        assert!(!providers[1].enabled);
    }

    #[test]
    fn test_invalid_consensus_rejected() {
        let err = EngineConfig::from_toml_str("[consensus]\nrequired_confidence = 2.0\n")
            .expect_err("out of range");
        assert!(matches!(
            err,
            OracleError::InvalidConfig { field: "required_confidence", .. }
        ));
    }

    #[test]
    fn test_empty_provider_name_rejected() {
        let err = EngineConfig::from_toml_str("[[providers]]\nname = \"\"\nendpoint = \"http://a\"\n")
            .expect_err("empty name");
        assert!(matches!(err, OracleError::EmptyProviderName));
    }

    #[test]
    fn test_unparseable_rejected() {
        let err = EngineConfig::from_toml_str("consensus = 3").expect_err("bad shape");
        assert!(matches!(err, OracleError::Config(_)));
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let _parsed = EngineConfig::from_toml_str(&toml_str).expect("parse");
    }
}
