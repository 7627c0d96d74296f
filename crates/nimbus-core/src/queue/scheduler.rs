// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delayed-set promotion loop.
//!
//! Periodically moves due jobs from the delayed set back to their live
//! queues. Several schedulers may run against the same store; the store's
//! atomic claim keeps each entry from being promoted twice. Tick timing is
//! jittered so a fleet of schedulers does not hit the store at once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use super::JobStore;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Mean time between promotion ticks. The actual sleep is drawn
    /// uniformly from [mean/2, 3*mean/2].
    pub mean_interval: Duration,
    /// Upper bound of the random startup delay.
    pub max_startup_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mean_interval: Duration::from_secs(15),
            max_startup_delay: Duration::from_secs(5),
        }
    }
}

/// Background promotion loop over a [`JobStore`]'s delayed set.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    config: SchedulerConfig,
    shutdown: Arc<Notify>,
}

impl Scheduler {
    /// Create a scheduler over the given store.
    pub fn new(store: Arc<dyn JobStore>, config: SchedulerConfig) -> Self {
        Self {
            store,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the promotion loop until shutdown is signalled.
    pub async fn run(self) {
        info!(
            mean_interval_secs = self.config.mean_interval.as_secs(),
            "Scheduler started"
        );

        // Stagger startup so a fleet of schedulers does not all hit the
        // store on the same tick from the beginning.
        let startup_delay = random_duration(Duration::ZERO, self.config.max_startup_delay);
        tokio::select! {
            _ = self.shutdown.notified() => {
                info!("Scheduler shutting down");
                return;
            }
            _ = tokio::time::sleep(startup_delay) => {}
        }

        loop {
            match self.store.promote_due(Utc::now()).await {
                Ok(0) => debug!("No delayed jobs due"),
                Ok(promoted) => info!(promoted, "Promoted delayed jobs"),
                // The delayed set is the source of truth; whatever this
                // tick missed is still there for the next one.
                Err(e) => error!(error = %e, "Failed to promote delayed jobs"),
            }

            let sleep_for = random_duration(
                self.config.mean_interval / 2,
                self.config.mean_interval * 3 / 2,
            );
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }
}

fn random_duration(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    min + Duration::from_millis(rand::thread_rng().gen_range(0..=span))
}
