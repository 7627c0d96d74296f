// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The central manager for all nimbus functionality.
//!
//! The HTTP API and the background workers are thin frontends over [`Core`]:
//! the API calls the synchronous methods, the worker binaries bind
//! [`CreateHandler`]/[`RemoveHandler`] to their queues, and the refresh
//! binary drives [`Core::provider_refresh`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::context::RequestContext;
use crate::crypto;
use crate::error::{Error, Result};
use crate::instance::{CreateInstanceAttributes, Instance, InstanceState};
use crate::persistence::{NewInstance, Persistence};
use crate::provider::{
    CreateAttributes, Provider, ProviderInstance, ProviderInstanceState, ProviderRegistry,
};
use crate::queue::{Job, JobStore};
use crate::worker::{HandlerError, HandlerResult, JobContext, JobHandler};

/// Queue the create worker consumes.
pub const CREATE_QUEUE: &str = "create";

/// Queue the remove worker consumes.
pub const REMOVE_QUEUE: &str = "remove";

/// Retry budget for the create and remove jobs.
pub const MAX_CREATE_RETRIES: u32 = 10;

/// Central manager for instance lifecycle operations.
pub struct Core {
    db: Arc<dyn Persistence>,
    jobs: Arc<dyn JobStore>,
    registry: ProviderRegistry,
    // Adapter cache keyed by provider name. The lock is only ever held to
    // read or swap the map, never across a provider call or an await.
    providers: Mutex<HashMap<String, Arc<dyn Provider>>>,
}

impl Core {
    /// Create a core backed by the given stores and adapter registry.
    pub fn new(
        db: Arc<dyn Persistence>,
        jobs: Arc<dyn JobStore>,
        registry: ProviderRegistry,
    ) -> Self {
        Self {
            db,
            jobs,
            registry,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the stored record for an instance.
    pub async fn get_instance(&self, id: &str) -> Result<Option<Instance>> {
        self.db.get_instance(id).await
    }

    /// Insert the instance row and queue the provider create job.
    ///
    /// Returns quickly: the provider is only touched by the create worker.
    pub async fn create_instance(
        &self,
        ctx: &RequestContext,
        provider_name: &str,
        attrs: CreateInstanceAttributes,
    ) -> Result<Instance> {
        let id = self
            .db
            .create_instance(NewInstance {
                provider_name: provider_name.to_string(),
                image: attrs.image_name.clone(),
                instance_type: attrs.instance_type,
                public_ssh_key: attrs.public_ssh_key.clone(),
                state: InstanceState::Creating,
            })
            .await?;

        self.jobs
            .enqueue(&Job::new(
                ctx.request_id,
                CREATE_QUEUE,
                id.clone().into_bytes(),
                MAX_CREATE_RETRIES,
            ))
            .await?;

        info!(request_id = %ctx.request_id, instance_id = %id, "Instance create accepted");

        Ok(Instance {
            id,
            provider_name: provider_name.to_string(),
            image: attrs.image_name,
            instance_type: attrs.instance_type,
            public_ssh_key: attrs.public_ssh_key,
            state: InstanceState::Creating,
            ip_address: None,
            upstream_id: None,
            error_reason: None,
        })
    }

    /// Queue the provider destroy job for an instance.
    ///
    /// A second remove for an instance already on its way out is a no-op:
    /// no job is enqueued and no error is returned.
    pub async fn remove_instance(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        let instance = self
            .db
            .get_instance(id)
            .await?
            .ok_or_else(|| Error::InstanceNotFound(id.to_string()))?;

        if matches!(
            instance.state,
            InstanceState::Terminating | InstanceState::Terminated
        ) {
            info!(
                request_id = %ctx.request_id,
                instance_id = %id,
                state = %instance.state,
                "Not removing instance, already on its way out"
            );
            return Ok(());
        }

        self.jobs
            .enqueue(&Job::new(
                ctx.request_id,
                REMOVE_QUEUE,
                id.as_bytes().to_vec(),
                MAX_CREATE_RETRIES,
            ))
            .await?;

        info!(request_id = %ctx.request_id, instance_id = %id, "Instance remove accepted");
        Ok(())
    }

    /// Check whether `token_id` + `token` matches a stored credential.
    ///
    /// Returns `Ok(true)` iff the scrypt hash of the presented token under
    /// the stored salt equals the stored hash; the comparison does not
    /// short-circuit. Unknown ids and malformed tokens are `Ok(false)`.
    pub async fn check_token(&self, token_id: u64, token: &str) -> Result<bool> {
        let Some((salt, hash)) = self.db.get_salt_and_hash_for_token(token_id).await? else {
            return Ok(false);
        };

        let Ok(decoded) = hex::decode(token) else {
            return Ok(false);
        };

        let derived = crypto::derive_token_hash(&decoded, &salt)?;
        Ok(crypto::hashes_match(&derived, &hash))
    }

    /// Create the provider-side machine for an instance (the `create`
    /// queue handler).
    pub async fn provider_create_instance(
        &self,
        ctx: &JobContext,
        payload: &[u8],
    ) -> HandlerResult {
        let id = payload_id(payload)?;

        info!(instance_id = %id, "Creating instance");

        let mut instance = self
            .db
            .get_instance(id)
            .await
            .map_err(HandlerError::Transient)?
            // The row was written before the job was enqueued; a missing
            // row is a lost write and no retry will bring it back.
            .ok_or_else(|| HandlerError::Permanent(Error::InstanceNotFound(id.to_string())))?;

        let provider = self.provider_for(&instance.provider_name).await?;

        let created = provider
            .create(
                id,
                CreateAttributes {
                    image_name: instance.image.clone(),
                    instance_type: instance.instance_type,
                    public_ssh_key: instance.public_ssh_key.clone(),
                },
            )
            .await;

        match created {
            Ok(report) => {
                instance.state = InstanceState::Starting;
                self.db
                    .update_instance(&instance)
                    .await
                    .map_err(HandlerError::Transient)?;

                info!(
                    instance_id = %id,
                    upstream_id = ?report.upstream_id,
                    "Created instance"
                );
                Ok(())
            }
            Err(e) => {
                error!(instance_id = %id, error = %e, "Error creating instance");

                // The errored state is written only once the budget is
                // spent; earlier failures leave the row in creating so the
                // lifecycle never visibly moves backwards.
                if ctx.is_final_attempt() {
                    instance.state = InstanceState::Errored;
                    instance.error_reason = Some(e.to_string());
                    if let Err(update_err) = self.db.update_instance(&instance).await {
                        error!(
                            instance_id = %id,
                            error = %update_err,
                            "Couldn't mark instance as errored"
                        );
                    }
                }

                Err(HandlerError::Transient(e.into()))
            }
        }
    }

    /// Destroy the provider-side machine for an instance (the `remove`
    /// queue handler).
    pub async fn provider_remove_instance(
        &self,
        _ctx: &JobContext,
        payload: &[u8],
    ) -> HandlerResult {
        let id = payload_id(payload)?;

        info!(instance_id = %id, "Removing instance");

        let mut instance = self
            .db
            .get_instance(id)
            .await
            .map_err(HandlerError::Transient)?
            .ok_or_else(|| HandlerError::Permanent(Error::InstanceNotFound(id.to_string())))?;

        let provider = self.provider_for(&instance.provider_name).await?;

        provider
            .destroy(id)
            .await
            .map_err(|e| HandlerError::Transient(e.into()))?;

        instance.state = InstanceState::Terminating;
        instance.error_reason = None;
        self.db
            .update_instance(&instance)
            .await
            .map_err(HandlerError::Transient)?;

        info!(instance_id = %id, "Removed instance");
        Ok(())
    }

    /// Synchronize provider-reported state into the database: one
    /// reconciliation tick over every configured provider.
    pub async fn provider_refresh(&self) -> Result<()> {
        self.reload_providers().await?;

        let snapshot: Vec<(String, Arc<dyn Provider>)> = {
            let providers = self.providers.lock().unwrap();
            providers
                .iter()
                .map(|(name, provider)| (name.clone(), provider.clone()))
                .collect()
        };

        let mut failed = 0;
        for (name, provider) in snapshot {
            match self.refresh_provider(&name, provider.as_ref()).await {
                Ok(count) => {
                    info!(provider = %name, instance_count = count, "Refreshed instances");
                }
                Err(e) => {
                    error!(provider = %name, error = %e, "Error refreshing provider");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(Error::Refresh(failed));
        }
        Ok(())
    }

    async fn refresh_provider(&self, name: &str, provider: &dyn Provider) -> Result<usize> {
        let reports = provider.list().await?;

        let mut seen = HashSet::new();
        for report in &reports {
            seen.insert(report.id.clone());

            let db_instance = match self.db.get_instance(&report.id).await {
                Ok(Some(instance)) => instance,
                Ok(None) => {
                    // Created out-of-band or belongs to another
                    // installation; nothing to reconcile.
                    warn!(
                        provider = %name,
                        provider_id = %report.id,
                        "Provider reported an unknown instance"
                    );
                    continue;
                }
                Err(e) => {
                    error!(
                        provider = %name,
                        provider_id = %report.id,
                        error = %e,
                        "Failed fetching instance from database"
                    );
                    continue;
                }
            };

            let updated = apply_report(db_instance, report);
            if let Err(e) = self.db.update_instance(&updated).await {
                error!(
                    provider = %name,
                    db_id = %updated.id,
                    error = %e,
                    "Failed to update instance in database"
                );
            }
        }

        // A terminating instance the provider no longer lists is done.
        let terminating = self
            .db
            .get_instances_by_state(InstanceState::Terminating)
            .await?;
        for mut instance in terminating {
            if instance.provider_name != name || seen.contains(&instance.id) {
                continue;
            }

            instance.state = InstanceState::Terminated;
            if let Err(e) = self.db.update_instance(&instance).await {
                error!(
                    provider = %name,
                    db_id = %instance.id,
                    error = %e,
                    "Failed to update instance in database"
                );
            }
        }

        Ok(reports.len())
    }

    /// Get the adapter for a provider name, reloading the cache on a miss.
    async fn provider_for(&self, name: &str) -> std::result::Result<Arc<dyn Provider>, HandlerError> {
        {
            let providers = self.providers.lock().unwrap();
            if let Some(provider) = providers.get(name) {
                return Ok(provider.clone());
            }
        }

        self.reload_providers()
            .await
            .map_err(HandlerError::Transient)?;

        let providers = self.providers.lock().unwrap();
        providers
            .get(name)
            .cloned()
            // The provider table is authoritative; a name that is still
            // absent after a reload will stay absent.
            .ok_or_else(|| HandlerError::Permanent(Error::ProviderNotFound(name.to_string())))
    }

    /// Rebuild the provider cache from the provider table.
    async fn reload_providers(&self) -> Result<()> {
        let records = self.db.list_providers().await?;

        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        for record in records {
            let adapter = self.registry.build(&record.provider_type, &record.config)?;
            providers.insert(record.name, adapter);
        }

        *self.providers.lock().unwrap() = providers;
        Ok(())
    }
}

/// Merge a provider report into the stored record.
fn apply_report(mut instance: Instance, report: &ProviderInstance) -> Instance {
    // Terminal rows are history; a stale listing cannot resurrect them or
    // rewrite why they ended.
    if instance.state.is_terminal() {
        return instance;
    }

    // Terminating is sticky: a machine still visible while shutting down
    // stays terminating, and only absence from a listing moves it on.
    if instance.state != InstanceState::Terminating {
        instance.state = match report.state {
            ProviderInstanceState::Starting => InstanceState::Starting,
            ProviderInstanceState::Running => InstanceState::Running,
            ProviderInstanceState::Stopping => InstanceState::Terminating,
            ProviderInstanceState::Errored => InstanceState::Errored,
        };
    }

    instance.ip_address = match instance.state {
        InstanceState::Starting | InstanceState::Running | InstanceState::Terminating => {
            report.ip_address.clone()
        }
        _ => None,
    };

    instance.upstream_id = report.upstream_id.clone();

    instance.error_reason = if instance.state == InstanceState::Errored {
        match report.error_reason.as_deref() {
            Some(reason) if !reason.is_empty() => Some(reason.to_string()),
            _ => Some("provider reported a terminal fault".to_string()),
        }
    } else {
        None
    };

    instance
}

fn payload_id(payload: &[u8]) -> std::result::Result<&str, HandlerError> {
    std::str::from_utf8(payload).map_err(|_| {
        HandlerError::Permanent(Error::Other("job payload is not a valid id".to_string()))
    })
}

/// `create` queue handler.
pub struct CreateHandler {
    core: Arc<Core>,
}

impl CreateHandler {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }
}

#[async_trait::async_trait]
impl JobHandler for CreateHandler {
    async fn run(&self, ctx: &JobContext, payload: &[u8]) -> HandlerResult {
        self.core.provider_create_instance(ctx, payload).await
    }
}

/// `remove` queue handler.
pub struct RemoveHandler {
    core: Arc<Core>,
}

impl RemoveHandler {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }
}

#[async_trait::async_trait]
impl JobHandler for RemoveHandler {
    async fn run(&self, ctx: &JobContext, payload: &[u8]) -> HandlerResult {
        self.core.provider_remove_instance(ctx, payload).await
    }
}
