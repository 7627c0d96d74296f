// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Nimbus HTTP API server.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use nimbus_core::config::Config;
use nimbus_core::core::Core;
use nimbus_core::persistence::PostgresPersistence;
use nimbus_core::provider::ProviderRegistry;
use nimbus_core::queue::PostgresJobStore;
use nimbus_core::worker::shutdown_signal;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nimbus_http=info".parse().unwrap())
                .add_directive("nimbus_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting nimbus HTTP API");

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    PostgresPersistence::migrate(&pool).await?;

    let db = Arc::new(PostgresPersistence::new(pool.clone(), config.encryption_key));
    let jobs = Arc::new(PostgresJobStore::new(pool.clone()));
    let core = Arc::new(Core::new(db, jobs, ProviderRegistry::with_builtin()));

    let app = nimbus_http::router(core);

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    info!("Shutdown complete");
    Ok(())
}
