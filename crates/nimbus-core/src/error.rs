// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for nimbus-core.

use thiserror::Error;

/// Core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Job store operation failed.
    #[error("Queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    /// Provider adapter call failed.
    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    /// Provider config could not be decrypted or re-encrypted.
    #[error("Crypto error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    /// Instance was not found.
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// No provider row with the given name exists.
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// No factory is registered for the provider type.
    #[error("Unknown provider type: {0}")]
    UnknownProviderType(String),

    /// One or more providers failed during a refresh tick.
    #[error("Refresh failed for {0} provider(s)")]
    Refresh(usize),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using core Error.
pub type Result<T> = std::result::Result<T, Error>;
