//! In-memory provider registry.
//!
//! The registry is the authoritative set of providers for one engine
//! instance. It is not synchronized on its own; the
//! [`OracleManager`](crate::manager::OracleManager) owns it behind a single
//! lock. State lives only for the lifetime of the process.

use std::collections::BTreeMap;

use tracing::info;

use crate::provider::{clamp_reputation, OracleProvider, ProviderUpdate};
use crate::{OracleError, Result};

/// Providers registered when no configuration supplies any.
pub fn seed_providers() -> Vec<OracleProvider> {
    vec![
        OracleProvider::new(
            "site-meter",
            "https://meter.empowergrid.example/v1/reading",
        )
        .with_reputation(95)
        .with_timeout_ms(5_000),
        OracleProvider::new(
            "grid-operator",
            "https://grid.empowergrid.example/v1/reading",
        )
        .with_reputation(90)
        .with_timeout_ms(8_000),
        OracleProvider::new(
            "satellite-estimate",
            "https://sat.empowergrid.example/v1/reading",
        )
        .with_reputation(80)
        .with_timeout_ms(10_000),
    ]
}

/// The set of known oracle providers, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, OracleProvider>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the given providers.
    ///
    /// # Errors
    ///
    /// [`OracleError::EmptyProviderName`] if any provider has an empty name.
    pub fn with_providers(providers: impl IntoIterator<Item = OracleProvider>) -> Result<Self> {
        let mut registry = Self::new();
        for provider in providers {
            registry.add(provider)?;
        }
        Ok(registry)
    }

    /// Insert or replace a provider by name.
    ///
    /// Replacing a provider discards its prior trust history.
    ///
    /// # Errors
    ///
    /// [`OracleError::EmptyProviderName`] if the name is empty.
    pub fn add(&mut self, mut provider: OracleProvider) -> Result<()> {
        if provider.name.is_empty() {
            return Err(OracleError::EmptyProviderName);
        }
        provider.reputation = clamp_reputation(provider.reputation);
        info!(
            provider = %provider.name,
            endpoint = %provider.endpoint,
            enabled = provider.enabled,
            "provider registered"
        );
        self.providers.insert(provider.name.clone(), provider);
        Ok(())
    }

    /// Remove a provider. Removing an unknown name is a no-op.
    ///
    /// Returns the removed record, if any.
    pub fn remove(&mut self, name: &str) -> Option<OracleProvider> {
        let removed = self.providers.remove(name);
        if removed.is_some() {
            info!(provider = name, "provider removed");
        }
        removed
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Option<&OracleProvider> {
        self.providers.get(name)
    }

    /// Mutable lookup, used by the fetch path to record trust transitions.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut OracleProvider> {
        self.providers.get_mut(name)
    }

    /// All providers, ordered by name.
    pub fn all(&self) -> impl Iterator<Item = &OracleProvider> {
        self.providers.values()
    }

    /// Providers with `enabled = true`, ordered by name.
    pub fn enabled(&self) -> impl Iterator<Item = &OracleProvider> {
        self.providers.values().filter(|p| p.enabled)
    }

    /// Merge partial fields into an existing provider.
    ///
    /// # Errors
    ///
    /// [`OracleError::UnknownProvider`] if no provider has that name.
    pub fn update(&mut self, name: &str, update: &ProviderUpdate) -> Result<()> {
        let provider = self
            .providers
            .get_mut(name)
            .ok_or_else(|| OracleError::UnknownProvider(name.to_string()))?;
        provider.apply(update);
        Ok(())
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no providers are registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
