// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory persistence for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{NewInstance, NewProvider, Persistence, ProviderRecord};
use crate::error::Result;
use crate::instance::{Instance, InstanceState};

struct TokenRow {
    id: u64,
    hash: Vec<u8>,
    salt: Vec<u8>,
}

/// In-memory [`Persistence`] implementation.
#[derive(Default)]
pub struct MemoryPersistence {
    instances: Mutex<HashMap<String, Instance>>,
    providers: Mutex<Vec<ProviderRecord>>,
    tokens: Mutex<Vec<TokenRow>>,
}

impl MemoryPersistence {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instance rows.
    pub fn instance_count(&self) -> usize {
        self.instances.lock().unwrap().len()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn create_instance(&self, instance: NewInstance) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.instances.lock().unwrap().insert(
            id.clone(),
            Instance {
                id: id.clone(),
                provider_name: instance.provider_name,
                image: instance.image,
                instance_type: instance.instance_type,
                public_ssh_key: instance.public_ssh_key,
                state: instance.state,
                ip_address: None,
                upstream_id: None,
                error_reason: None,
            },
        );
        Ok(id)
    }

    async fn get_instance(&self, id: &str) -> Result<Option<Instance>> {
        Ok(self.instances.lock().unwrap().get(id).cloned())
    }

    async fn get_instances_by_state(&self, state: InstanceState) -> Result<Vec<Instance>> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.state == state)
            .cloned()
            .collect())
    }

    async fn update_instance(&self, instance: &Instance) -> Result<()> {
        let mut instances = self.instances.lock().unwrap();
        if !instances.contains_key(&instance.id) {
            return Err(crate::error::Error::InstanceNotFound(instance.id.clone()));
        }
        instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn list_providers(&self) -> Result<Vec<ProviderRecord>> {
        Ok(self.providers.lock().unwrap().clone())
    }

    async fn create_provider(&self, provider: NewProvider) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.providers.lock().unwrap().push(ProviderRecord {
            id: id.clone(),
            provider_type: provider.provider_type,
            name: provider.name,
            config: provider.config,
        });
        Ok(id)
    }

    async fn get_provider_by_name(&self, name: &str) -> Result<Option<ProviderRecord>> {
        Ok(self
            .providers
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn get_salt_and_hash_for_token(
        &self,
        token_id: u64,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == token_id)
            .map(|t| (t.salt.clone(), t.hash.clone())))
    }

    async fn insert_token(&self, description: &str, hash: &[u8], salt: &[u8]) -> Result<u64> {
        let _ = description;
        let mut tokens = self.tokens.lock().unwrap();
        let id = tokens.len() as u64 + 1;
        tokens.push(TokenRow {
            id,
            hash: hash.to_vec(),
            salt: salt.to_vec(),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceType;

    fn new_instance() -> NewInstance {
        NewInstance {
            provider_name: "fake".to_string(),
            image: "standard-image".to_string(),
            instance_type: InstanceType::Standard,
            public_ssh_key: None,
            state: InstanceState::Creating,
        }
    }

    #[tokio::test]
    async fn instance_round_trip() {
        let db = MemoryPersistence::new();
        let id = db.create_instance(new_instance()).await.unwrap();

        let mut instance = db.get_instance(&id).await.unwrap().unwrap();
        assert_eq!(instance.state, InstanceState::Creating);
        assert_eq!(instance.id, id);

        instance.state = InstanceState::Starting;
        db.update_instance(&instance).await.unwrap();
        assert_eq!(
            db.get_instance(&id).await.unwrap().unwrap().state,
            InstanceState::Starting
        );
    }

    #[tokio::test]
    async fn update_missing_instance_is_an_error() {
        let db = MemoryPersistence::new();
        let id = db.create_instance(new_instance()).await.unwrap();
        let mut instance = db.get_instance(&id).await.unwrap().unwrap();
        instance.id = "no-such-id".to_string();
        assert!(db.update_instance(&instance).await.is_err());
    }

    #[tokio::test]
    async fn instances_by_state() {
        let db = MemoryPersistence::new();
        db.create_instance(new_instance()).await.unwrap();
        let id = db.create_instance(new_instance()).await.unwrap();

        let mut instance = db.get_instance(&id).await.unwrap().unwrap();
        instance.state = InstanceState::Terminating;
        db.update_instance(&instance).await.unwrap();

        let terminating = db
            .get_instances_by_state(InstanceState::Terminating)
            .await
            .unwrap();
        assert_eq!(terminating.len(), 1);
        assert_eq!(terminating[0].id, id);
    }

    #[tokio::test]
    async fn provider_and_token_rows() {
        let db = MemoryPersistence::new();
        db.create_provider(NewProvider {
            provider_type: "fake".to_string(),
            name: "fake-east".to_string(),
            config: b"{}".to_vec(),
        })
        .await
        .unwrap();

        assert_eq!(db.list_providers().await.unwrap().len(), 1);
        assert!(db
            .get_provider_by_name("fake-east")
            .await
            .unwrap()
            .is_some());
        assert!(db.get_provider_by_name("gce").await.unwrap().is_none());

        let id = db.insert_token("ci", b"hash", b"salt").await.unwrap();
        let (salt, hash) = db
            .get_salt_and_hash_for_token(id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(salt, b"salt");
        assert_eq!(hash, b"hash");
        assert!(db.get_salt_and_hash_for_token(999).await.unwrap().is_none());
    }
}
