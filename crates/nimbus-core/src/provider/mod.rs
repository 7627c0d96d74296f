// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provider adapter trait definitions.
//!
//! Defines the uniform interface the core drives for each cloud. Adapters
//! translate these calls into a specific cloud's API and are registered by
//! type alias in a [`registry::ProviderRegistry`].

pub mod fake;
pub mod registry;

pub use self::fake::FakeProvider;
pub use self::registry::ProviderRegistry;

use async_trait::async_trait;
use thiserror::Error;

use crate::instance::InstanceType;

/// Errors from provider adapter operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// The provider does not know the instance.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// The adapter config blob could not be parsed.
    #[error("invalid provider config: {0}")]
    InvalidConfig(String),

    /// The create call was rejected by the provider.
    #[error("create rejected: {0}")]
    CreateRejected(String),

    /// Transport-level failure talking to the provider API.
    #[error("transport error: {0}")]
    Transport(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// State of an instance as reported by the provider.
///
/// Providers never report "terminated": an instance the provider has
/// finished destroying simply stops appearing in [`Provider::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderInstanceState {
    /// The machine is booting.
    Starting,
    /// The machine is up.
    Running,
    /// The machine is shutting down.
    Stopping,
    /// The machine hit a terminal fault on the provider side.
    Errored,
}

/// An instance as seen by a provider.
#[derive(Debug, Clone)]
pub struct ProviderInstance {
    /// The core instance id. Adapters embed it in the provider-side name
    /// and recover it when listing.
    pub id: String,
    /// Provider-reported state.
    pub state: ProviderInstanceState,
    /// Public address, once assigned.
    pub ip_address: Option<String>,
    /// Provider-native identifier, when different from `id`.
    pub upstream_id: Option<String>,
    /// Fault description when `state` is `Errored`.
    pub error_reason: Option<String>,
}

/// Attributes for a provider create call.
#[derive(Debug, Clone)]
pub struct CreateAttributes {
    pub image_name: String,
    pub instance_type: InstanceType,
    pub public_ssh_key: Option<String>,
}

/// Uniform facade over one cloud.
///
/// Adapters are PURE API clients - they do NOT touch the database. They
/// must be safe for concurrent use; the core shares one adapter instance
/// across handlers and the refresh loop.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Create an instance.
    ///
    /// Must be idempotent on `id`: calling twice with the same id (as a
    /// retried job will) must not produce two provider-side machines.
    async fn create(&self, id: &str, attrs: CreateAttributes) -> Result<ProviderInstance>;

    /// Fetch a single instance by core id.
    async fn get(&self, id: &str) -> Result<ProviderInstance>;

    /// List the instances belonging to this installation.
    ///
    /// Adapters name machines with a recognizable prefix and filter on it,
    /// so machines created out-of-band are never returned.
    async fn list(&self) -> Result<Vec<ProviderInstance>>;

    /// Destroy an instance by core id.
    async fn destroy(&self, id: &str) -> Result<()>;
}
