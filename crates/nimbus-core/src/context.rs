// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request-scoped context.
//!
//! A [`RequestContext`] is created at the edge (one per API request or per
//! fetched job) and passed explicitly down the call chain. Only the request
//! id crosses process boundaries: it is serialized into the job record and
//! rehydrated on the worker side.

use tracing::Span;
use uuid::Uuid;

/// Identifies one request as it moves through the API, the queue, and the
/// workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    /// Correlation id, propagated to logs and into job records.
    pub request_id: Uuid,
}

impl RequestContext {
    /// Create a context with a fresh request id.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
        }
    }

    /// Create a context carrying an existing request id.
    pub fn with_request_id(request_id: Uuid) -> Self {
        Self { request_id }
    }

    /// A tracing span tagged with the request id. Callers enter it around
    /// the work done on behalf of this request.
    pub fn span(&self, operation: &'static str) -> Span {
        tracing::info_span!("request", request_id = %self.request_id, operation)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
