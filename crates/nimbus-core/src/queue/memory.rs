// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory job store for tests.
//!
//! Mirrors the Postgres store's semantics: FIFO per queue, atomic take on
//! fetch, and at-most-once promotion of each delayed entry.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Job, JobStore, Result};

/// In-memory [`JobStore`] implementation.
#[derive(Default)]
pub struct MemoryJobStore {
    queues: Mutex<HashMap<String, VecDeque<Job>>>,
    delayed: Mutex<Vec<(DateTime<Utc>, Job)>>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting on a queue.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Number of entries in the delayed set.
    pub fn delayed_len(&self) -> usize {
        self.delayed.lock().unwrap().len()
    }

    /// Remove and return the head of a queue without blocking.
    pub fn try_fetch(&self, queue: &str) -> Option<Job> {
        self.queues
            .lock()
            .unwrap()
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        self.queues
            .lock()
            .unwrap()
            .entry(job.queue.clone())
            .or_default()
            .push_back(job.clone());
        Ok(())
    }

    async fn fetch(&self, queue: &str) -> Result<Job> {
        loop {
            if let Some(job) = self.try_fetch(queue) {
                return Ok(job);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn schedule_at(&self, at: DateTime<Utc>, job: &Job) -> Result<()> {
        self.delayed.lock().unwrap().push((at, job.clone()));
        Ok(())
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut promoted = 0;
        loop {
            // Claim one due entry at a time; a concurrent promoter that
            // grabs the lock first wins the entry and we simply see it gone.
            let job = {
                let mut delayed = self.delayed.lock().unwrap();
                match delayed.iter().position(|(at, _)| *at <= now) {
                    Some(index) => delayed.swap_remove(index).1,
                    None => break,
                }
            };

            self.enqueue(&job).await?;
            promoted += 1;
        }
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job(queue: &str, payload: &[u8]) -> Job {
        Job::new(Uuid::new_v4(), queue, payload.to_vec(), 10)
    }

    #[tokio::test]
    async fn fifo_per_queue() {
        let store = MemoryJobStore::new();
        store.enqueue(&job("create", b"a")).await.unwrap();
        store.enqueue(&job("create", b"b")).await.unwrap();
        store.enqueue(&job("remove", b"c")).await.unwrap();

        assert_eq!(store.fetch("create").await.unwrap().payload, b"a");
        assert_eq!(store.fetch("create").await.unwrap().payload, b"b");
        assert_eq!(store.fetch("remove").await.unwrap().payload, b"c");
        assert_eq!(store.queue_len("create"), 0);
    }

    #[tokio::test]
    async fn fetch_blocks_until_enqueue() {
        let store = std::sync::Arc::new(MemoryJobStore::new());

        let fetcher = {
            let store = store.clone();
            tokio::spawn(async move { store.fetch("create").await.unwrap() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.enqueue(&job("create", b"late")).await.unwrap();

        let fetched = tokio::time::timeout(Duration::from_secs(5), fetcher)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.payload, b"late");
    }

    #[tokio::test]
    async fn promotion_moves_only_due_jobs() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        store
            .schedule_at(now - chrono::Duration::seconds(1), &job("create", b"due"))
            .await
            .unwrap();
        store
            .schedule_at(now + chrono::Duration::seconds(60), &job("create", b"later"))
            .await
            .unwrap();

        assert_eq!(store.promote_due(now).await.unwrap(), 1);
        assert_eq!(store.queue_len("create"), 1);
        assert_eq!(store.delayed_len(), 1);
        assert_eq!(store.try_fetch("create").unwrap().payload, b"due");
    }

    #[tokio::test]
    async fn racing_promoters_enqueue_each_job_once() {
        let store = std::sync::Arc::new(MemoryJobStore::new());
        let now = Utc::now();

        for i in 0..20 {
            store
                .schedule_at(
                    now - chrono::Duration::seconds(1),
                    &job("create", format!("job-{i}").as_bytes()),
                )
                .await
                .unwrap();
        }

        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.promote_due(now).await.unwrap() })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.promote_due(now).await.unwrap() })
        };

        let total = a.await.unwrap() + b.await.unwrap();
        assert_eq!(total, 20);
        assert_eq!(store.queue_len("create"), 20);
        assert_eq!(store.delayed_len(), 0);
    }
}
