// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runs the 'remove instance' background worker.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use nimbus_core::config::Config;
use nimbus_core::core::{Core, RemoveHandler, REMOVE_QUEUE};
use nimbus_core::persistence::PostgresPersistence;
use nimbus_core::provider::ProviderRegistry;
use nimbus_core::queue::PostgresJobStore;
use nimbus_core::worker::{shutdown_signal, WorkerRunner};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nimbus_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting nimbus remove worker");

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    PostgresPersistence::migrate(&pool).await?;

    let db = Arc::new(PostgresPersistence::new(pool.clone(), config.encryption_key));
    let jobs = Arc::new(PostgresJobStore::new(pool.clone()));
    let core = Arc::new(Core::new(db, jobs.clone(), ProviderRegistry::with_builtin()));

    let runner = WorkerRunner::new(jobs, REMOVE_QUEUE, Arc::new(RemoveHandler::new(core)));
    let shutdown = runner.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.notify_one();
    });

    runner.run().await?;

    pool.close().await;
    info!("Shutdown complete");
    Ok(())
}
