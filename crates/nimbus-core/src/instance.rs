// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance model and lifecycle states.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of an instance.
///
/// The state is the only field several actors mutate: the API inserts rows
/// in `Creating`, the create worker advances to `Starting` (or `Errored`),
/// the refresh loop advances to `Running`/`Terminating`/`Terminated`, and
/// the remove worker advances to `Terminating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InstanceState {
    /// Row inserted, provider not yet called.
    Creating,
    /// Provider accepted the create call; the machine is booting.
    Starting,
    /// The provider reports the machine as up.
    Running,
    /// A destroy was submitted (or the provider reports it stopping).
    Terminating,
    /// The provider no longer lists the machine.
    Terminated,
    /// Create retries were exhausted or the provider reported a fault.
    Errored,
}

impl InstanceState {
    /// Whether the state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Terminated | InstanceState::Errored)
    }

    /// Whether a transition from `self` to `next` is part of the lifecycle.
    pub fn may_transition_to(self, next: InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, next),
            (Creating, Starting)
                | (Creating, Errored)
                | (Starting, Running)
                | (Starting, Errored)
                | (Starting, Terminating)
                | (Running, Terminating)
                | (Creating, Terminating)
                | (Terminating, Terminated)
        )
    }
}

/// Machine size class. Opaque to the core, interpreted by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InstanceType {
    Standard,
    Premium,
}

/// A single compute instance and its control-plane record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Unique identifier, assigned by the core at create time. The adapter
    /// derives the provider-side name from it, which is what makes retried
    /// create calls idempotent.
    pub id: String,
    /// Selects the adapter in the provider cache.
    pub provider_name: String,
    /// Image name, passed through to the adapter.
    pub image: String,
    /// Size class, passed through to the adapter.
    pub instance_type: InstanceType,
    /// Public SSH key injected into the machine, if any.
    pub public_ssh_key: Option<String>,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// Written by the refresh loop once the provider reports an address.
    pub ip_address: Option<String>,
    /// Adapter-native identifier, when different from `id`.
    pub upstream_id: Option<String>,
    /// Set on the transition to `Errored`.
    pub error_reason: Option<String>,
}

/// Attributes needed to create an instance.
#[derive(Debug, Clone)]
pub struct CreateInstanceAttributes {
    pub image_name: String,
    pub instance_type: InstanceType,
    pub public_ssh_key: Option<String>,
}
