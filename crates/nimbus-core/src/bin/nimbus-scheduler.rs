// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runs the delayed-job promotion loop.
//!
//! Several schedulers may run side by side; promotion of each delayed
//! entry is claimed atomically, so duplicates are not enqueued.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use nimbus_core::config::Config;
use nimbus_core::persistence::PostgresPersistence;
use nimbus_core::queue::{scheduler::SchedulerConfig, PostgresJobStore, Scheduler};
use nimbus_core::worker::shutdown_signal;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nimbus_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting nimbus scheduler");

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    PostgresPersistence::migrate(&pool).await?;

    let jobs = Arc::new(PostgresJobStore::new(pool.clone()));
    let scheduler = Scheduler::new(jobs, SchedulerConfig::default());

    let shutdown = scheduler.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.notify_one();
    });

    scheduler.run().await;

    pool.close().await;
    info!("Shutdown complete");
    Ok(())
}
