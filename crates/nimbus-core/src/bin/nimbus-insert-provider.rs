// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operator tool: insert a provider row.
//!
//! Usage: nimbus-insert-provider <name> <type> <config-file>
//!
//! The config file holds the provider-specific JSON blob; it is encrypted
//! with the process-wide key before it reaches the database. Pass `-` to
//! read the config from stdin.

use std::io::Read;

use anyhow::{bail, Context, Result};
use sqlx::postgres::PgPoolOptions;

use nimbus_core::config::Config;
use nimbus_core::persistence::{NewProvider, Persistence, PostgresPersistence};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        bail!("usage: {} <name> <type> <config-file>", args[0]);
    }
    let (name, provider_type, config_path) = (&args[1], &args[2], &args[3]);

    let provider_config = if config_path == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("reading config from stdin")?;
        buf
    } else {
        std::fs::read(config_path)
            .with_context(|| format!("reading config file {config_path}"))?
    };

    // Catch obviously broken configs before they are sealed away.
    serde_json::from_slice::<serde_json::Value>(&provider_config)
        .context("provider config must be valid JSON")?;

    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.database_url)
        .await?;
    PostgresPersistence::migrate(&pool).await?;

    let db = PostgresPersistence::new(pool.clone(), config.encryption_key);

    let id = db
        .create_provider(NewProvider {
            provider_type: provider_type.clone(),
            name: name.clone(),
            config: provider_config,
        })
        .await?;

    println!("{id}");

    pool.close().await;
    Ok(())
}
