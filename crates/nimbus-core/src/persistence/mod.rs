// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for nimbus-core.
//!
//! The database is the source of truth for instance state. Updates are
//! last-writer-wins full-row overwrites; the distinct actors write disjoint
//! field sets in practice, so no optimistic concurrency token is carried.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryPersistence;
pub use self::postgres::PostgresPersistence;

use async_trait::async_trait;

use crate::error::Result;
use crate::instance::{Instance, InstanceState, InstanceType};

/// Data for a new instance row. The id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub provider_name: String,
    pub image: String,
    pub instance_type: InstanceType,
    pub public_ssh_key: Option<String>,
    pub state: InstanceState,
}

/// A cloud provider row. `config` is the decrypted blob; it is only ever
/// handed to the adapter factory for `provider_type`.
#[derive(Debug, Clone)]
pub struct ProviderRecord {
    /// UUID for this provider row.
    pub id: String,
    /// Adapter type alias, resolved through the provider registry.
    pub provider_type: String,
    /// Unique name clients pass to select this provider.
    pub name: String,
    /// Decrypted provider-specific configuration.
    pub config: Vec<u8>,
}

/// Data for a new provider row. `config` is plaintext here; the store
/// encrypts it before writing.
#[derive(Debug, Clone)]
pub struct NewProvider {
    pub provider_type: String,
    pub name: String,
    pub config: Vec<u8>,
}

/// Persistence interface consumed by the core.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert an instance row, assigning and returning its id.
    async fn create_instance(&self, instance: NewInstance) -> Result<String>;

    /// Fetch an instance by id.
    async fn get_instance(&self, id: &str) -> Result<Option<Instance>>;

    /// Fetch every instance currently in the given state.
    async fn get_instances_by_state(&self, state: InstanceState) -> Result<Vec<Instance>>;

    /// Overwrite the full row identified by `instance.id`.
    async fn update_instance(&self, instance: &Instance) -> Result<()>;

    /// List all providers, with decrypted configs. Fails if any config
    /// cannot be decrypted (wrong key or corrupted row).
    async fn list_providers(&self) -> Result<Vec<ProviderRecord>>;

    /// Insert a provider row, encrypting its config. Returns the id.
    async fn create_provider(&self, provider: NewProvider) -> Result<String>;

    /// Fetch a provider by its unique name, with decrypted config.
    async fn get_provider_by_name(&self, name: &str) -> Result<Option<ProviderRecord>>;

    /// Fetch the salt and hash stored for a token id.
    async fn get_salt_and_hash_for_token(&self, token_id: u64)
        -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Insert a token row, returning its id.
    async fn insert_token(&self, description: &str, hash: &[u8], salt: &[u8]) -> Result<u64>;
}
