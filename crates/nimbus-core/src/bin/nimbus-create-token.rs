// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operator tool: mint an API token.
//!
//! Usage: nimbus-create-token <description>
//!
//! Prints the full credential (`<id>-<hex-token>`) exactly once; only the
//! salt and hash are stored, so the token cannot be recovered later.

use anyhow::{bail, Result};
use sqlx::postgres::PgPoolOptions;

use nimbus_core::config::Config;
use nimbus_core::crypto;
use nimbus_core::persistence::{Persistence, PostgresPersistence};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        bail!("usage: {} <description>", args[0]);
    }
    let description = &args[1];

    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.database_url)
        .await?;
    PostgresPersistence::migrate(&pool).await?;

    let db = PostgresPersistence::new(pool.clone(), config.encryption_key);

    let (token, salt, hash) = crypto::generate_token()?;
    let id = db.insert_token(description, &hash, &salt).await?;

    println!("{id}-{token}");

    pool.close().await;
    Ok(())
}
