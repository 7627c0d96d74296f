// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed persistence.
//!
//! Provider configs are encrypted at rest with the process-wide secret box;
//! rows come back decrypted or not at all.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewInstance, NewProvider, Persistence, ProviderRecord};
use crate::crypto::SecretBox;
use crate::error::{Error, Result};
use crate::instance::{Instance, InstanceState, InstanceType};

/// PostgreSQL [`Persistence`] implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
    secret_box: SecretBox,
}

impl PostgresPersistence {
    /// Create a store on the given pool, encrypting provider configs with
    /// the given key.
    pub fn new(pool: PgPool, encryption_key: [u8; 32]) -> Self {
        Self {
            pool,
            secret_box: SecretBox::new(encryption_key),
        }
    }

    /// Run the schema migrations for this store.
    pub async fn migrate(pool: &PgPool) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct InstanceRow {
    id: String,
    provider_name: String,
    image: String,
    instance_type: String,
    ssh_key: Option<String>,
    state: String,
    ip_address: Option<String>,
    upstream_id: Option<String>,
    error_reason: Option<String>,
}

impl InstanceRow {
    fn into_instance(self) -> Result<Instance> {
        let state = InstanceState::from_str(&self.state)
            .map_err(|_| Error::Other(format!("invalid state in database: {}", self.state)))?;
        let instance_type = InstanceType::from_str(&self.instance_type).map_err(|_| {
            Error::Other(format!(
                "invalid instance type in database: {}",
                self.instance_type
            ))
        })?;

        Ok(Instance {
            id: self.id,
            provider_name: self.provider_name,
            image: self.image,
            instance_type,
            public_ssh_key: self.ssh_key,
            state,
            ip_address: self.ip_address,
            upstream_id: self.upstream_id,
            error_reason: self.error_reason,
        })
    }
}

const INSTANCE_COLUMNS: &str =
    "id, provider_name, image, instance_type, ssh_key, state, ip_address, upstream_id, error_reason";

#[async_trait]
impl Persistence for PostgresPersistence {
    async fn create_instance(&self, instance: NewInstance) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO instances (id, provider_name, image, instance_type, ssh_key, state)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&id)
        .bind(&instance.provider_name)
        .bind(&instance.image)
        .bind(instance.instance_type.to_string())
        .bind(&instance.public_ssh_key)
        .bind(instance.state.to_string())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_instance(&self, id: &str) -> Result<Option<Instance>> {
        let row: Option<InstanceRow> = sqlx::query_as(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(InstanceRow::into_instance).transpose()
    }

    async fn get_instances_by_state(&self, state: InstanceState) -> Result<Vec<Instance>> {
        let rows: Vec<InstanceRow> = sqlx::query_as(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE state = $1"
        ))
        .bind(state.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(InstanceRow::into_instance).collect()
    }

    async fn update_instance(&self, instance: &Instance) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET provider_name = $2, image = $3, instance_type = $4, ssh_key = $5,
                state = $6, ip_address = $7, upstream_id = $8, error_reason = $9
            WHERE id = $1
            "#,
        )
        .bind(&instance.id)
        .bind(&instance.provider_name)
        .bind(&instance.image)
        .bind(instance.instance_type.to_string())
        .bind(&instance.public_ssh_key)
        .bind(instance.state.to_string())
        .bind(&instance.ip_address)
        .bind(&instance.upstream_id)
        .bind(&instance.error_reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::InstanceNotFound(instance.id.clone()));
        }

        Ok(())
    }

    async fn list_providers(&self) -> Result<Vec<ProviderRecord>> {
        let rows: Vec<(String, String, String, Vec<u8>)> =
            sqlx::query_as("SELECT id, type, name, config FROM providers")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(id, provider_type, name, sealed)| {
                let config = self.secret_box.open(&sealed)?;
                Ok(ProviderRecord {
                    id,
                    provider_type,
                    name,
                    config,
                })
            })
            .collect()
    }

    async fn create_provider(&self, provider: NewProvider) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let sealed = self.secret_box.seal(&provider.config)?;

        sqlx::query("INSERT INTO providers (id, type, name, config) VALUES ($1, $2, $3, $4)")
            .bind(&id)
            .bind(&provider.provider_type)
            .bind(&provider.name)
            .bind(&sealed)
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    async fn get_provider_by_name(&self, name: &str) -> Result<Option<ProviderRecord>> {
        let row: Option<(String, String, String, Vec<u8>)> =
            sqlx::query_as("SELECT id, type, name, config FROM providers WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((id, provider_type, name, sealed)) => {
                let config = self.secret_box.open(&sealed)?;
                Ok(Some(ProviderRecord {
                    id,
                    provider_type,
                    name,
                    config,
                }))
            }
            None => Ok(None),
        }
    }

    async fn get_salt_and_hash_for_token(
        &self,
        token_id: u64,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Ok(token_id) = i64::try_from(token_id) else {
            return Ok(None);
        };

        let row: Option<(Vec<u8>, Vec<u8>)> =
            sqlx::query_as("SELECT token_salt, token_hash FROM auth_tokens WHERE id = $1")
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row)
    }

    async fn insert_token(&self, description: &str, hash: &[u8], salt: &[u8]) -> Result<u64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO auth_tokens (description, token_hash, token_salt)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(description)
        .bind(hash)
        .bind(salt)
        .fetch_one(&self.pool)
        .await?;

        Ok(id as u64)
    }
}
