// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP JSON API for the nimbus control plane.
//!
//! A thin façade: authentication middleware in front of three instance
//! endpoints, all delegating to [`nimbus_core::Core`].

pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use nimbus_core::Core;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Core>,
}

/// Build the API router.
pub fn router(core: Arc<Core>) -> Router {
    let state = AppState { core };

    Router::new()
        .route(
            "/instances",
            post(handlers::create_instance).delete(handlers::delete_instance),
        )
        .route("/instances/{id}", get(handlers::get_instance))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ))
        .with_state(state)
}
