// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Adapter factory registry.
//!
//! Maps provider `type` strings to factory functions. The registry is an
//! explicit object built at startup and injected into the core; nothing
//! registers itself through module-load side effects.

use std::collections::HashMap;
use std::sync::Arc;

use super::{FakeProvider, Provider, ProviderError};

/// Factory function turning a decrypted config blob into an adapter.
pub type ProviderFactory =
    Box<dyn Fn(&[u8]) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync>;

/// Registry of adapter factories keyed by provider type.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the built-in adapter types registered.
    ///
    /// Currently that is only `fake`, used by tests and local development;
    /// cloud SDK adapters are registered by the binaries that link them.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("fake", |config| {
            FakeProvider::from_config(config).map(|p| Arc::new(p) as Arc<dyn Provider>)
        });
        registry
    }

    /// Register a factory under a type alias. A later registration for the
    /// same alias replaces the earlier one.
    pub fn register<F>(&mut self, alias: &str, factory: F)
    where
        F: Fn(&[u8]) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync + 'static,
    {
        self.factories.insert(alias.to_string(), Box::new(factory));
    }

    /// Construct an adapter of the given type from its config blob.
    pub fn build(
        &self,
        alias: &str,
        config: &[u8],
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        let factory = self
            .factories
            .get(alias)
            .ok_or_else(|| ProviderError::InvalidConfig(format!("unknown provider type: {alias}")))?;
        factory(config)
    }

    /// Whether a factory is registered for the alias.
    pub fn contains(&self, alias: &str) -> bool {
        self.factories.contains_key(alias)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
