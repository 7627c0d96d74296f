// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for nimbus-core lifecycle tests.
//!
//! Wires a [`Core`] to the in-memory backends and a single shared fake
//! provider, the way the worker binaries wire the real ones.

#![allow(dead_code)]

use std::sync::Arc;

use nimbus_core::context::RequestContext;
use nimbus_core::core::{Core, CREATE_QUEUE, REMOVE_QUEUE};
use nimbus_core::instance::{CreateInstanceAttributes, Instance, InstanceType};
use nimbus_core::persistence::{MemoryPersistence, NewProvider, Persistence};
use nimbus_core::provider::{FakeProvider, ProviderRegistry};
use nimbus_core::queue::{Job, MemoryJobStore};
use nimbus_core::worker::{HandlerResult, JobContext};

/// Name of the provider row every test context starts with.
pub const PROVIDER_NAME: &str = "fake-east";

/// Test context bundling the core with its in-memory collaborators.
pub struct TestContext {
    pub db: Arc<MemoryPersistence>,
    pub jobs: Arc<MemoryJobStore>,
    pub fake: Arc<FakeProvider>,
    pub core: Arc<Core>,
}

impl TestContext {
    /// Create a context with one registered fake provider.
    pub async fn new() -> Self {
        let db = Arc::new(MemoryPersistence::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let fake = Arc::new(FakeProvider::new());

        db.create_provider(NewProvider {
            provider_type: "fake".to_string(),
            name: PROVIDER_NAME.to_string(),
            config: b"{}".to_vec(),
        })
        .await
        .unwrap();

        // The factory hands out the same fake so tests can poke at
        // provider-side state across cache reloads.
        let mut registry = ProviderRegistry::new();
        let shared = fake.clone();
        registry.register("fake", move |_config| Ok(shared.clone()));

        let core = Arc::new(Core::new(db.clone(), jobs.clone(), registry));

        Self {
            db,
            jobs,
            fake,
            core,
        }
    }

    /// Accept a create request for the standard image.
    pub async fn accept_create(&self) -> Instance {
        self.core
            .create_instance(
                &RequestContext::new(),
                PROVIDER_NAME,
                CreateInstanceAttributes {
                    image_name: "standard-image".to_string(),
                    instance_type: InstanceType::Standard,
                    public_ssh_key: None,
                },
            )
            .await
            .unwrap()
    }

    /// Pop the next job off a queue and run it through the matching
    /// handler, the way one worker delivery would.
    pub async fn deliver_one(&self, queue: &str) -> HandlerResult {
        let job = self
            .jobs
            .try_fetch(queue)
            .unwrap_or_else(|| panic!("no job waiting on the {queue} queue"));
        self.run_job(queue, &job).await
    }

    /// Run an already-fetched job through the matching handler.
    pub async fn run_job(&self, queue: &str, job: &Job) -> HandlerResult {
        let ctx = JobContext {
            request_id: job.uuid,
            attempt: job.retry_count,
            max_retries: job.max_retries,
        };
        match queue {
            CREATE_QUEUE => self.core.provider_create_instance(&ctx, &job.payload).await,
            REMOVE_QUEUE => self.core.provider_remove_instance(&ctx, &job.payload).await,
            other => panic!("no handler for queue {other}"),
        }
    }

    /// Current state of an instance row.
    pub async fn instance(&self, id: &str) -> Instance {
        self.db
            .get_instance(id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("instance {id} not in database"))
    }
}
