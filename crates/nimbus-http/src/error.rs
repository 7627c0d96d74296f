// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! API error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub errors: Vec<String>,
}

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// API error type. The display string is the message clients see.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable Authorization header on the request.
    #[error("authorization header required")]
    AuthorizationHeaderRequired,

    /// The credential did not split into a numeric id and a token.
    #[error("invalid token (token ID must be numerical)")]
    NonNumericalTokenId,

    /// The credential did not match a stored token.
    #[error("invalid token")]
    InvalidToken,

    /// Instance not found.
    #[error("instance not found")]
    NotFound,

    /// The request body could not be parsed.
    #[error("failed to parse request: {0}")]
    BadRequest(String),

    /// Something downstream failed.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::AuthorizationHeaderRequired
            | ApiError::NonNumericalTokenId
            | ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            errors: vec![self.to_string()],
        };

        tracing::info!(response = %status.as_u16(), error = %self, "Request failed");

        (status, Json(body)).into_response()
    }
}

impl From<nimbus_core::Error> for ApiError {
    fn from(err: nimbus_core::Error) -> Self {
        match err {
            nimbus_core::Error::InstanceNotFound(_) => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}
