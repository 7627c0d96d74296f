// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// Nimbus configuration, shared by the API server and the worker binaries.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// 32-byte key for provider-config encryption at rest
    pub encryption_key: [u8; 32],
    /// HTTP listen address for the API server
    pub http_addr: SocketAddr,
    /// Base interval between refresh ticks
    pub refresh_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `NIMBUS_DATABASE_URL`: PostgreSQL connection string
    /// - `NIMBUS_ENCRYPTION_KEY`: hex-encoded 32-byte key
    ///
    /// Optional (with defaults):
    /// - `NIMBUS_HTTP_PORT`: API listen port (default: 8080)
    /// - `NIMBUS_REFRESH_INTERVAL_SECS`: refresh tick interval (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("NIMBUS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("NIMBUS_DATABASE_URL"))?;

        let key_hex = std::env::var("NIMBUS_ENCRYPTION_KEY")
            .map_err(|_| ConfigError::Missing("NIMBUS_ENCRYPTION_KEY"))?;
        let encryption_key = parse_encryption_key(&key_hex)?;

        let http_port: u16 = std::env::var("NIMBUS_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("NIMBUS_HTTP_PORT", "must be a valid port number"))?;

        let refresh_secs: u64 = std::env::var("NIMBUS_REFRESH_INTERVAL_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "NIMBUS_REFRESH_INTERVAL_SECS",
                    "must be a positive integer",
                )
            })?;

        Ok(Self {
            database_url,
            encryption_key,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            refresh_interval: Duration::from_secs(refresh_secs),
        })
    }
}

fn parse_encryption_key(key_hex: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(key_hex.trim())
        .map_err(|_| ConfigError::Invalid("NIMBUS_ENCRYPTION_KEY", "must be hex-encoded"))?;
    bytes
        .try_into()
        .map_err(|_| ConfigError::Invalid("NIMBUS_ENCRYPTION_KEY", "must decode to 32 bytes"))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_key() {
        assert!(parse_encryption_key("deadbeef").is_err());
    }

    #[test]
    fn accepts_full_key() {
        let key = parse_encryption_key(&"ab".repeat(32)).unwrap();
        assert_eq!(key.len(), 32);
        assert_eq!(key[0], 0xab);
    }

    #[test]
    fn rejects_non_hex() {
        assert!(parse_encryption_key(&"zz".repeat(32)).is_err());
    }
}
