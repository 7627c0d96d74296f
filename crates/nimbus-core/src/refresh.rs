// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation loop driver.
//!
//! Runs [`Core::provider_refresh`] on a fixed interval, stretching the
//! interval linearly while ticks keep failing so a broken provider API is
//! not hammered. A successful tick snaps the interval back to its base.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info};

use crate::core::Core;

const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Refresh worker configuration.
#[derive(Debug, Clone)]
pub struct RefreshWorkerConfig {
    /// Base interval between ticks.
    pub interval: Duration,
}

impl Default for RefreshWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Background worker driving reconciliation ticks.
pub struct RefreshWorker {
    core: Arc<Core>,
    config: RefreshWorkerConfig,
    shutdown: Arc<Notify>,
    error_count: u32,
}

impl RefreshWorker {
    /// Create a refresh worker over the given core.
    pub fn new(core: Arc<Core>, config: RefreshWorkerConfig) -> Self {
        Self {
            core,
            config,
            shutdown: Arc::new(Notify::new()),
            error_count: 0,
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run ticks until shutdown is signalled.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Refresh worker started"
        );

        loop {
            match self.core.provider_refresh().await {
                Ok(()) => self.error_count = 0,
                Err(e) => {
                    self.error_count += 1;
                    error!(
                        error = %e,
                        consecutive_errors = self.error_count,
                        "An error occurred when refreshing"
                    );
                }
            }

            let sleep_for = backoff(self.config.interval, self.error_count);
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Refresh worker shutting down");
                    break;
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }
}

fn backoff(interval: Duration, error_count: u32) -> Duration {
    interval
        .checked_mul(error_count.saturating_add(1))
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_linearly() {
        let interval = Duration::from_secs(5);
        assert_eq!(backoff(interval, 0), Duration::from_secs(5));
        assert_eq!(backoff(interval, 1), Duration::from_secs(10));
        assert_eq!(backoff(interval, 3), Duration::from_secs(20));
    }

    #[test]
    fn backoff_is_clamped_at_five_minutes() {
        let interval = Duration::from_secs(5);
        assert_eq!(backoff(interval, 100), Duration::from_secs(300));
        assert_eq!(backoff(interval, u32::MAX - 1), Duration::from_secs(300));
    }
}
