// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker runtime: the pull loop that delivers jobs to handlers.
//!
//! One [`WorkerRunner`] serves one queue. It fetches a job, invokes the
//! handler, and on failure parks the job in the delayed set with a linear
//! backoff until the retry budget is spent. The backoff is intentionally
//! linear rather than exponential: provider rate-limit windows reset on a
//! second scale, so `attempt x 5s` recovers as fast as is useful.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::queue::{Job, JobStore};

const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(5);

/// Job-scoped context handed to handlers.
///
/// Rehydrated from the job record on the worker side; the request id is
/// the one minted when the originating API request arrived.
#[derive(Debug, Clone, Copy)]
pub struct JobContext {
    /// Correlation id from the originating request.
    pub request_id: Uuid,
    /// How many times this job has already failed.
    pub attempt: u32,
    /// The job's retry budget.
    pub max_retries: u32,
}

impl JobContext {
    /// Whether this delivery is the last one the budget allows.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_retries
    }
}

/// How a handler failed.
#[derive(Debug)]
pub enum HandlerError {
    /// Worth retrying: the next delivery may succeed.
    Transient(Error),
    /// Retrying cannot help; the job is dropped immediately.
    Permanent(Error),
}

impl HandlerError {
    fn message(&self) -> String {
        match self {
            HandlerError::Transient(e) | HandlerError::Permanent(e) => e.to_string(),
        }
    }
}

/// Result type for job handlers.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// A consumer of jobs from one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one job payload.
    async fn run(&self, ctx: &JobContext, payload: &[u8]) -> HandlerResult;
}

/// Pull loop binding a queue to a handler.
pub struct WorkerRunner {
    store: Arc<dyn JobStore>,
    queue: String,
    handler: Arc<dyn JobHandler>,
    retry_base_delay: Duration,
    shutdown: Arc<Notify>,
}

impl WorkerRunner {
    /// Create a runner for the given queue and handler.
    pub fn new(store: Arc<dyn JobStore>, queue: &str, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            store,
            queue: queue.to_string(),
            handler,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Override the per-attempt backoff unit (attempt x delay).
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Get a handle to signal shutdown.
    ///
    /// Shutdown interrupts only the next fetch; a handler that is already
    /// running completes on its own.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the pull loop.
    ///
    /// Returns `Ok(())` after a shutdown signal, or the transport error if
    /// fetching failed; that is fatal and the process should exit
    /// non-zero.
    pub async fn run(&self) -> Result<(), Error> {
        info!(queue = %self.queue, "Worker started");

        loop {
            let job = tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(queue = %self.queue, "Worker shutting down");
                    return Ok(());
                }
                fetched = self.store.fetch(&self.queue) => match fetched {
                    Ok(job) => job,
                    Err(e) => {
                        error!(queue = %self.queue, error = %e, "Fetch failed, worker exiting");
                        return Err(e.into());
                    }
                },
            };

            self.run_job(job).await;
        }
    }

    async fn run_job(&self, mut job: Job) {
        let ctx = JobContext {
            request_id: job.uuid,
            attempt: job.retry_count,
            max_retries: job.max_retries,
        };
        let span = ctx_span(&self.queue, &ctx);
        let _enter = span.enter();

        // A panicking handler must not take the worker down; it is treated
        // like any other transient failure.
        let result = AssertUnwindSafe(self.handler.run(&ctx, &job.payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HandlerError::Transient(Error::Other(format!(
                    "handler panicked: {}",
                    panic_message(&*panic)
                ))))
            });

        let failure = match result {
            Ok(()) => return,
            Err(failure) => failure,
        };

        job.error = Some(failure.message());
        if job.retry_count > 0 {
            job.retried_at = Some(Utc::now());
        } else {
            job.failed_at = Some(Utc::now());
        }
        job.retry_count += 1;

        match failure {
            HandlerError::Permanent(e) => {
                error!(error = %e, "Permanent failure, dropping job");
            }
            HandlerError::Transient(e) if job.retry_count <= job.max_retries => {
                let delay = self.retry_base_delay * job.retry_count;
                warn!(
                    error = %e,
                    retry_count = job.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Job failed, scheduling retry"
                );
                let due = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                if let Err(e) = self.store.schedule_at(due, &job).await {
                    error!(error = %e, "Failed to schedule retry, job lost");
                }
            }
            HandlerError::Transient(e) => {
                error!(
                    error = %e,
                    retries = job.retry_count,
                    failed_at = ?job.failed_at,
                    queue = %job.queue,
                    "Exhausted retry count"
                );
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM.
///
/// Worker binaries use this to trigger graceful shutdown: the runner stops
/// fetching, the in-flight handler finishes, the process exits.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn ctx_span(queue: &str, ctx: &JobContext) -> tracing::Span {
    tracing::info_span!(
        "job",
        queue,
        request_id = %ctx.request_id,
        attempt = ctx.attempt,
    )
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
