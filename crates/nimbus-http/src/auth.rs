// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Token authentication middleware.
//!
//! Every request carries `Authorization: token <id>-<hex-token>` (or the
//! same credential as HTTP basic auth with username `token`). The id
//! selects the stored salt and hash; the presented token is run through
//! the KDF and compared in constant time.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;

use crate::error::ApiError;
use crate::AppState;

/// Reject the request unless it carries a valid token.
pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    match authorize(&state, header.as_deref()).await {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

async fn authorize(state: &AppState, header: Option<&str>) -> Result<(), ApiError> {
    let credential = extract_credential(header)?;

    let (id_part, token_part) = credential
        .split_once('-')
        .ok_or(ApiError::NonNumericalTokenId)?;
    let token_id: u64 = id_part
        .parse()
        .map_err(|_| ApiError::NonNumericalTokenId)?;

    let valid = state
        .core
        .check_token(token_id, token_part)
        .await
        .map_err(|_| ApiError::InvalidToken)?;

    if !valid {
        return Err(ApiError::InvalidToken);
    }
    Ok(())
}

/// Pull the `<id>-<hex-token>` credential out of the Authorization header.
fn extract_credential(header: Option<&str>) -> Result<String, ApiError> {
    let header = header.ok_or(ApiError::AuthorizationHeaderRequired)?;

    if let Some(token) = header.strip_prefix("token ") {
        return Ok(token.to_string());
    }

    // Basic auth with username "token" carries the credential as the
    // password, which is what curl's user:password syntax produces.
    if let Some(encoded) = header.strip_prefix("Basic ") {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| ApiError::AuthorizationHeaderRequired)?;
        let decoded =
            String::from_utf8(decoded).map_err(|_| ApiError::AuthorizationHeaderRequired)?;
        if let Some(("token", credential)) = decoded.split_once(':') {
            return Ok(credential.to_string());
        }
    }

    Err(ApiError::AuthorizationHeaderRequired)
}
