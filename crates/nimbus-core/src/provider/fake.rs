// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory provider adapter for tests and local development.
//!
//! Behaves like a very small cloud: it only knows the image
//! `standard-image`, assigns addresses when told a machine came up, and
//! forgets machines as soon as they are destroyed (so the refresh loop can
//! infer termination from absence).

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rand::Rng;

use super::{
    CreateAttributes, Provider, ProviderError, ProviderInstance, ProviderInstanceState, Result,
};

/// The single image the fake provider accepts.
pub const FAKE_IMAGE: &str = "standard-image";

/// In-memory [`Provider`] implementation.
#[derive(Default)]
pub struct FakeProvider {
    instances: Mutex<HashMap<String, ProviderInstance>>,
    fail_list: AtomicBool,
}

impl FakeProvider {
    /// Create an empty fake provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory used by the provider registry. Any JSON object is accepted.
    pub fn from_config(config: &[u8]) -> Result<Self> {
        if !config.is_empty() {
            serde_json::from_slice::<serde_json::Value>(config)
                .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?;
        }
        Ok(Self::new())
    }

    /// Mark a machine as running and give it a synthetic address.
    pub fn mark_running(&self, id: &str) {
        let mut instances = self.instances.lock().unwrap();
        if let Some(instance) = instances.get_mut(id) {
            let octets: [u8; 4] = rand::thread_rng().gen();
            instance.ip_address = Some(format!(
                "{}.{}.{}.{}",
                octets[0], octets[1], octets[2], octets[3]
            ));
            instance.state = ProviderInstanceState::Running;
        }
    }

    /// Mark a machine as shutting down.
    pub fn mark_stopping(&self, id: &str) {
        let mut instances = self.instances.lock().unwrap();
        if let Some(instance) = instances.get_mut(id) {
            instance.state = ProviderInstanceState::Stopping;
        }
    }

    /// Make every subsequent `list` call fail (or stop failing).
    pub fn set_list_error(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Number of machines the fake currently knows.
    pub fn instance_count(&self) -> usize {
        self.instances.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn create(&self, id: &str, attrs: CreateAttributes) -> Result<ProviderInstance> {
        if attrs.image_name.is_empty() {
            return Err(ProviderError::CreateRejected("image is required".to_string()));
        }
        if attrs.image_name != FAKE_IMAGE {
            return Err(ProviderError::CreateRejected("unknown image".to_string()));
        }

        let mut instances = self.instances.lock().unwrap();

        // Re-creating the same id returns the existing machine, which is
        // what keeps retried create jobs from leaking instances.
        if let Some(existing) = instances.get(id) {
            return Ok(existing.clone());
        }

        let instance = ProviderInstance {
            id: id.to_string(),
            state: ProviderInstanceState::Starting,
            ip_address: None,
            upstream_id: Some(format!("fake-{id}")),
            error_reason: None,
        };
        instances.insert(id.to_string(), instance.clone());

        Ok(instance)
    }

    async fn get(&self, id: &str) -> Result<ProviderInstance> {
        self.instances
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::InstanceNotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<ProviderInstance>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("list failed".to_string()));
        }

        Ok(self.instances.lock().unwrap().values().cloned().collect())
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        let mut instances = self.instances.lock().unwrap();
        if instances.remove(id).is_none() {
            return Err(ProviderError::InstanceNotFound(id.to_string()));
        }
        Ok(())
    }
}
