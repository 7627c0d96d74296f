// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance endpoint handlers.
//!
//! Thin translations between HTTP and [`nimbus_core::Core`]: parse, call,
//! shape the response. The create and remove paths return as soon as the
//! row is written and the job queued; the provider is never touched here.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use nimbus_core::context::RequestContext;
use nimbus_core::instance::{CreateInstanceAttributes, Instance, InstanceType};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Instance representation returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceResponse {
    pub id: String,
    pub provider: String,
    pub image: String,
    pub ip_address: Option<String>,
    pub state: String,
}

impl From<Instance> for InstanceResponse {
    fn from(instance: Instance) -> Self {
        Self {
            id: instance.id,
            provider: instance.provider_name,
            image: instance.image,
            ip_address: instance.ip_address,
            state: instance.state.to_string(),
        }
    }
}

/// Body of a create request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateInstanceRequest {
    pub provider: String,
    pub image: String,
    #[serde(default = "default_instance_type")]
    pub instance_type: InstanceType,
    #[serde(default)]
    pub public_ssh_key: Option<String>,
}

fn default_instance_type() -> InstanceType {
    InstanceType::Standard
}

/// Body of a delete request.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteInstanceRequest {
    pub instance_id: String,
}

/// GET /instances/{id}
pub async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceResponse>> {
    let instance = state
        .core
        .get_instance(&id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(instance.into()))
}

/// POST /instances
pub async fn create_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateInstanceRequest>, JsonRejection>,
) -> ApiResult<Json<InstanceResponse>> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let ctx = request_context(&headers);

    let instance = state
        .core
        .create_instance(
            &ctx,
            &req.provider,
            CreateInstanceAttributes {
                image_name: req.image,
                instance_type: req.instance_type,
                public_ssh_key: req.public_ssh_key,
            },
        )
        .instrument(ctx.span("create_instance"))
        .await
        .map_err(ApiError::from)?;

    Ok(Json(instance.into()))
}

/// DELETE /instances
pub async fn delete_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<DeleteInstanceRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let ctx = request_context(&headers);

    state
        .core
        .remove_instance(&ctx, &req.instance_id)
        .instrument(ctx.span("remove_instance"))
        .await
        .map_err(ApiError::from)?;

    Ok(StatusCode::OK)
}

/// Use the caller's X-Request-ID when it is a UUID, otherwise mint one.
fn request_context(headers: &HeaderMap) -> RequestContext {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .map(RequestContext::with_request_id)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::instance::InstanceState;

    #[test]
    fn response_serializes_missing_address_as_null() {
        let response = InstanceResponse::from(Instance {
            id: "i-1".to_string(),
            provider_name: "gce".to_string(),
            image: "standard-image".to_string(),
            instance_type: InstanceType::Standard,
            public_ssh_key: None,
            state: InstanceState::Creating,
            ip_address: None,
            upstream_id: None,
            error_reason: None,
        });

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ip_address"], serde_json::Value::Null);
        assert_eq!(json["state"], "creating");
        assert_eq!(json["provider"], "gce");
    }

    #[test]
    fn create_request_defaults_to_standard() {
        let req: CreateInstanceRequest =
            serde_json::from_str(r#"{"provider": "gce", "image": "standard-image"}"#).unwrap();
        assert_eq!(req.instance_type, InstanceType::Standard);
        assert!(req.public_ssh_key.is_none());
    }

    #[test]
    fn request_context_honors_request_id_header() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", id.to_string().parse().unwrap());
        assert_eq!(request_context(&headers).request_id, id);

        headers.insert("x-request-id", "not-a-uuid".parse().unwrap());
        assert_ne!(request_context(&headers).request_id, id);
    }
}
