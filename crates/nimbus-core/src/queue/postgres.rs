// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed job store.
//!
//! Live queues are rows in `background_jobs`, consumed in insertion order
//! with `FOR UPDATE SKIP LOCKED` so concurrent workers never take the same
//! row. The delayed set is `scheduled_jobs`, ordered by `run_at`; claiming
//! a due entry is a `DELETE ... WHERE id` whose row count decides which
//! promoter owns it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::PgPool;
use tokio::time::sleep;

use super::{Job, JobStore, Result};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_JITTER: Duration = Duration::from_millis(100);

/// PostgreSQL [`JobStore`] implementation.
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
    poll_interval: Duration,
    jitter: Duration,
}

impl PostgresJobStore {
    /// Create a store on the given pool with default fetch polling.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
            jitter: DEFAULT_JITTER,
        }
    }

    /// Override how often an idle `fetch` re-polls the queue.
    ///
    /// Jitter spreads the polls of concurrent workers so they do not hit
    /// the database in lockstep.
    pub fn with_poll_interval(mut self, poll_interval: Duration, jitter: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.jitter = jitter;
        self
    }

    fn sleep_duration_with_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.poll_interval;
        }
        let jitter_millis = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let random_jitter = rand::thread_rng().gen_range(0..=jitter_millis);
        self.poll_interval + Duration::from_millis(random_jitter)
    }

    /// Take the head of a queue if one is available.
    async fn take_one(&self, queue: &str) -> Result<Option<Job>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            r#"
            DELETE FROM background_jobs
            WHERE id = (
                SELECT id FROM background_jobs
                WHERE queue = $1
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING job
            "#,
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((bytes,)) => Ok(Some(Job::decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        let encoded = job.encode()?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO queues (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(&job.queue)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO background_jobs (queue, job) VALUES ($1, $2)")
            .bind(&job.queue)
            .bind(&encoded)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn fetch(&self, queue: &str) -> Result<Job> {
        loop {
            if let Some(job) = self.take_one(queue).await? {
                return Ok(job);
            }
            sleep(self.sleep_duration_with_jitter()).await;
        }
    }

    async fn schedule_at(&self, at: DateTime<Utc>, job: &Job) -> Result<()> {
        let encoded = job.encode()?;
        sqlx::query("INSERT INTO scheduled_jobs (run_at, job) VALUES ($1, $2)")
            .bind(at)
            .bind(&encoded)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let due: Vec<(i64, Vec<u8>)> = sqlx::query_as(
            "SELECT id, job FROM scheduled_jobs WHERE run_at <= $1 ORDER BY run_at, id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut promoted = 0;
        for (id, bytes) in due {
            // The delete either claims the entry for this promoter or tells
            // us another promoter already took it.
            let removed = sqlx::query("DELETE FROM scheduled_jobs WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?
                .rows_affected();

            if removed == 0 {
                continue;
            }

            let job = Job::decode(&bytes)?;
            self.enqueue(&job).await?;
            promoted += 1;
        }

        Ok(promoted)
    }
}
