// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable job queue with delayed re-delivery.
//!
//! A [`JobStore`] delivers opaque jobs to named FIFO queues at least once.
//! Failed jobs are parked in a time-ordered delayed set and promoted back
//! into their live queue by the [`scheduler::Scheduler`] once due. Delivery
//! is at-least-once; promotion of a single delayed entry is at-most-once
//! even with several promoters racing, because claiming an entry is an
//! atomic remove that only one promoter wins.

pub mod memory;
pub mod postgres;
pub mod scheduler;

pub use self::memory::MemoryJobStore;
pub use self::postgres::PostgresJobStore;
pub use self::scheduler::Scheduler;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from job store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QueueError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A job record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result type for job store operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// A unit of background work.
///
/// The payload is opaque to the queue; for the instance queues it is the
/// instance id. The record is stored in its encoded form, so whatever the
/// producer wrote is exactly what the worker decodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Request id of the originating request, propagated to worker logs.
    pub uuid: Uuid,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Logical queue name.
    pub queue: String,
    /// Retry budget.
    pub max_retries: u32,
    /// Failures so far. Zero for a fresh job.
    #[serde(default)]
    pub retry_count: u32,
    /// Message of the most recent failure.
    #[serde(default)]
    pub error: Option<String>,
    /// When the job first failed.
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    /// When the job most recently failed again.
    #[serde(default)]
    pub retried_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a fresh job for the given queue.
    pub fn new(request_id: Uuid, queue: &str, payload: Vec<u8>, max_retries: u32) -> Self {
        Self {
            uuid: request_id,
            payload,
            queue: queue.to_string(),
            max_retries,
            retry_count: 0,
            error: None,
            failed_at: None,
            retried_at: None,
        }
    }

    /// Serialize the job to its wire form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a job from its wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Durable at-least-once delivery of jobs to named queues.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Append a job to the tail of its queue and record the queue in the
    /// set of known queues. Atomic across both writes.
    async fn enqueue(&self, job: &Job) -> Result<()>;

    /// Block until a job is available on the queue, then remove and return
    /// it (atomic take from the head). Blocking is unbounded; cancellation
    /// belongs to the caller.
    async fn fetch(&self, queue: &str) -> Result<Job>;

    /// Park a job in the delayed set, due at `at`.
    async fn schedule_at(&self, at: DateTime<Utc>, job: &Job) -> Result<()>;

    /// Move every delayed job due at or before `now` back to its live
    /// queue. Returns how many jobs this call promoted. Entries claimed by
    /// a concurrent promoter are skipped, not double-enqueued.
    async fn promote_due(&self, now: DateTime<Utc>) -> Result<u64>;
}
