// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end lifecycle tests over the in-memory backends.
//!
//! Each test plays the part of the worker runtime by delivering queued
//! jobs to the core handlers, then checks what the database records.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nimbus_core::context::RequestContext;
use nimbus_core::core::{CreateHandler, CREATE_QUEUE, REMOVE_QUEUE};
use nimbus_core::instance::{CreateInstanceAttributes, InstanceState, InstanceType};
use nimbus_core::persistence::Persistence;
use nimbus_core::provider::Provider;
use nimbus_core::queue::JobStore;
use nimbus_core::worker::{HandlerError, JobContext, WorkerRunner};

use common::{TestContext, PROVIDER_NAME};

fn attrs(image: &str) -> CreateInstanceAttributes {
    CreateInstanceAttributes {
        image_name: image.to_string(),
        instance_type: InstanceType::Standard,
        public_ssh_key: None,
    }
}

#[tokio::test]
async fn happy_create_reaches_running() {
    let ctx = TestContext::new().await;

    // The API path: row written, job queued, provider untouched.
    let accepted = ctx.accept_create().await;
    assert_eq!(accepted.state, InstanceState::Creating);
    assert_eq!(ctx.instance(&accepted.id).await.state, InstanceState::Creating);
    assert_eq!(ctx.jobs.queue_len(CREATE_QUEUE), 1);
    assert_eq!(ctx.fake.instance_count(), 0);

    // One create delivery moves the row to starting.
    ctx.deliver_one(CREATE_QUEUE).await.unwrap();
    assert_eq!(ctx.instance(&accepted.id).await.state, InstanceState::Starting);
    assert_eq!(ctx.fake.instance_count(), 1);

    // Once the provider reports the machine up, a refresh tick lands
    // running plus an address.
    ctx.fake.mark_running(&accepted.id);
    ctx.core.provider_refresh().await.unwrap();

    let refreshed = ctx.instance(&accepted.id).await;
    assert_eq!(refreshed.state, InstanceState::Running);
    assert!(refreshed.ip_address.is_some());
    assert_eq!(
        refreshed.upstream_id.as_deref(),
        Some(format!("fake-{}", accepted.id).as_str())
    );
}

#[tokio::test]
async fn failed_create_stays_creating_until_budget_spent() {
    let ctx = TestContext::new().await;

    let accepted = ctx
        .core
        .create_instance(&RequestContext::new(), PROVIDER_NAME, attrs("unknown-image"))
        .await
        .unwrap();

    let job = ctx.jobs.try_fetch(CREATE_QUEUE).unwrap();

    // Early failures leave the row in creating; no visible errored ->
    // starting regression is possible on a later successful retry.
    for attempt in 0..job.max_retries {
        let result = ctx
            .core
            .provider_create_instance(
                &JobContext {
                    request_id: job.uuid,
                    attempt,
                    max_retries: job.max_retries,
                },
                &job.payload,
            )
            .await;
        assert!(matches!(result, Err(HandlerError::Transient(_))));
        assert_eq!(ctx.instance(&accepted.id).await.state, InstanceState::Creating);
    }

    // The final attempt writes the terminal record.
    let result = ctx
        .core
        .provider_create_instance(
            &JobContext {
                request_id: job.uuid,
                attempt: job.max_retries,
                max_retries: job.max_retries,
            },
            &job.payload,
        )
        .await;
    assert!(matches!(result, Err(HandlerError::Transient(_))));

    let errored = ctx.instance(&accepted.id).await;
    assert_eq!(errored.state, InstanceState::Errored);
    assert!(errored.error_reason.as_deref().is_some_and(|r| !r.is_empty()));
}

#[tokio::test]
async fn create_retries_through_the_runtime_end_in_errored() {
    let ctx = TestContext::new().await;

    // An empty image fails on every attempt.
    let accepted = ctx
        .core
        .create_instance(&RequestContext::new(), PROVIDER_NAME, attrs(""))
        .await
        .unwrap();

    let runner = Arc::new(
        WorkerRunner::new(
            ctx.jobs.clone(),
            CREATE_QUEUE,
            Arc::new(CreateHandler::new(ctx.core.clone())),
        )
        .with_retry_base_delay(Duration::ZERO),
    );
    let shutdown = runner.shutdown_handle();
    let worker = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.run().await })
    };

    // Promote retries until the budget is spent and the job is gone.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        ctx.jobs.promote_due(Utc::now()).await.unwrap();
        if ctx.instance(&accepted.id).await.state == InstanceState::Errored {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "instance never reached errored"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let errored = ctx.instance(&accepted.id).await;
    assert_eq!(errored.state, InstanceState::Errored);
    assert_eq!(
        errored.error_reason.as_deref(),
        Some("create rejected: image is required")
    );
    assert_eq!(ctx.jobs.queue_len(CREATE_QUEUE), 0);
    assert_eq!(ctx.jobs.delayed_len(), 0);
}

#[tokio::test]
async fn remove_then_absence_reconciles_to_terminated() {
    let ctx = TestContext::new().await;

    let accepted = ctx.accept_create().await;
    ctx.deliver_one(CREATE_QUEUE).await.unwrap();
    ctx.fake.mark_running(&accepted.id);
    ctx.core.provider_refresh().await.unwrap();

    ctx.core
        .remove_instance(&RequestContext::new(), &accepted.id)
        .await
        .unwrap();
    assert_eq!(ctx.jobs.queue_len(REMOVE_QUEUE), 1);

    // The remove delivery destroys the machine and marks terminating.
    ctx.deliver_one(REMOVE_QUEUE).await.unwrap();
    assert_eq!(
        ctx.instance(&accepted.id).await.state,
        InstanceState::Terminating
    );
    assert_eq!(ctx.fake.instance_count(), 0);

    // The fake no longer lists the machine, so one tick finishes the job.
    ctx.core.provider_refresh().await.unwrap();
    assert_eq!(
        ctx.instance(&accepted.id).await.state,
        InstanceState::Terminated
    );
}

#[tokio::test]
async fn terminating_instance_still_listed_stays_terminating() {
    let ctx = TestContext::new().await;

    let accepted = ctx.accept_create().await;
    ctx.deliver_one(CREATE_QUEUE).await.unwrap();
    ctx.fake.mark_running(&accepted.id);

    let mut instance = ctx.instance(&accepted.id).await;
    instance.state = InstanceState::Terminating;
    ctx.db.update_instance(&instance).await.unwrap();

    // Still present in the listing: absence is the only terminated signal.
    ctx.core.provider_refresh().await.unwrap();
    assert_eq!(
        ctx.instance(&accepted.id).await.state,
        InstanceState::Terminating
    );
}

#[tokio::test]
async fn errored_instance_still_listed_is_not_resurrected() {
    let ctx = TestContext::new().await;

    let accepted = ctx.accept_create().await;
    ctx.deliver_one(CREATE_QUEUE).await.unwrap();
    ctx.fake.mark_running(&accepted.id);

    // The row lands in errored while the provider still lists the machine.
    let mut instance = ctx.instance(&accepted.id).await;
    instance.state = InstanceState::Errored;
    instance.error_reason = Some("provider reported a terminal fault".to_string());
    instance.ip_address = None;
    ctx.db.update_instance(&instance).await.unwrap();

    // The live report must not flip it back to running.
    ctx.core.provider_refresh().await.unwrap();

    let after = ctx.instance(&accepted.id).await;
    assert_eq!(after.state, InstanceState::Errored);
    assert_eq!(
        after.error_reason.as_deref(),
        Some("provider reported a terminal fault")
    );
}

#[tokio::test]
async fn stopping_report_moves_running_instance_to_terminating() {
    let ctx = TestContext::new().await;

    let accepted = ctx.accept_create().await;
    ctx.deliver_one(CREATE_QUEUE).await.unwrap();
    ctx.fake.mark_running(&accepted.id);
    ctx.core.provider_refresh().await.unwrap();

    // The provider starts shutting the machine down on its own.
    ctx.fake.mark_stopping(&accepted.id);
    ctx.core.provider_refresh().await.unwrap();
    assert_eq!(
        ctx.instance(&accepted.id).await.state,
        InstanceState::Terminating
    );
}

#[tokio::test]
async fn double_delete_is_a_no_op() {
    let ctx = TestContext::new().await;

    let accepted = ctx.accept_create().await;
    ctx.deliver_one(CREATE_QUEUE).await.unwrap();

    ctx.core
        .remove_instance(&RequestContext::new(), &accepted.id)
        .await
        .unwrap();
    ctx.deliver_one(REMOVE_QUEUE).await.unwrap();
    assert_eq!(
        ctx.instance(&accepted.id).await.state,
        InstanceState::Terminating
    );

    // A second delete for a terminating instance enqueues nothing.
    ctx.core
        .remove_instance(&RequestContext::new(), &accepted.id)
        .await
        .unwrap();
    assert_eq!(ctx.jobs.queue_len(REMOVE_QUEUE), 0);
}

#[tokio::test]
async fn remove_unknown_instance_is_an_error() {
    let ctx = TestContext::new().await;
    assert!(ctx
        .core
        .remove_instance(&RequestContext::new(), "no-such-id")
        .await
        .is_err());
}

#[tokio::test]
async fn create_for_unknown_provider_fails_permanently() {
    let ctx = TestContext::new().await;

    let accepted = ctx
        .core
        .create_instance(&RequestContext::new(), "gce-west", attrs("standard-image"))
        .await
        .unwrap();

    let result = ctx.deliver_one(CREATE_QUEUE).await;
    assert!(matches!(result, Err(HandlerError::Permanent(_))));
    // The row stays where the API left it.
    assert_eq!(ctx.instance(&accepted.id).await.state, InstanceState::Creating);
}

#[tokio::test]
async fn refresh_skips_machines_it_does_not_know() {
    let ctx = TestContext::new().await;

    // A machine created out-of-band on the provider, no matching row.
    ctx.fake
        .create(
            "stray-machine",
            nimbus_core::provider::CreateAttributes {
                image_name: "standard-image".to_string(),
                instance_type: InstanceType::Standard,
                public_ssh_key: None,
            },
        )
        .await
        .unwrap();

    ctx.core.provider_refresh().await.unwrap();
    assert_eq!(ctx.db.instance_count(), 0);
}

#[tokio::test]
async fn refresh_reports_provider_errors_for_backoff() {
    let ctx = TestContext::new().await;

    ctx.fake.set_list_error(true);
    assert!(ctx.core.provider_refresh().await.is_err());

    ctx.fake.set_list_error(false);
    ctx.core.provider_refresh().await.unwrap();
}

#[tokio::test]
async fn lifecycle_history_follows_the_state_machine() {
    let ctx = TestContext::new().await;

    let accepted = ctx.accept_create().await;
    let mut history = vec![ctx.instance(&accepted.id).await.state];

    ctx.deliver_one(CREATE_QUEUE).await.unwrap();
    history.push(ctx.instance(&accepted.id).await.state);

    ctx.fake.mark_running(&accepted.id);
    ctx.core.provider_refresh().await.unwrap();
    history.push(ctx.instance(&accepted.id).await.state);

    ctx.core
        .remove_instance(&RequestContext::new(), &accepted.id)
        .await
        .unwrap();
    ctx.deliver_one(REMOVE_QUEUE).await.unwrap();
    history.push(ctx.instance(&accepted.id).await.state);

    ctx.core.provider_refresh().await.unwrap();
    history.push(ctx.instance(&accepted.id).await.state);

    assert_eq!(
        history,
        vec![
            InstanceState::Creating,
            InstanceState::Starting,
            InstanceState::Running,
            InstanceState::Terminating,
            InstanceState::Terminated,
        ]
    );
    for pair in history.windows(2) {
        assert!(pair[0].may_transition_to(pair[1]));
    }
}

#[tokio::test]
async fn token_round_trip_through_core() {
    let ctx = TestContext::new().await;

    let (token, salt, hash) = nimbus_core::crypto::generate_token().unwrap();
    let id = ctx.db.insert_token("ci", &hash, &salt).await.unwrap();

    assert!(ctx.core.check_token(id, &token).await.unwrap());
    assert!(!ctx.core.check_token(id, "deadbeef").await.unwrap());
    assert!(!ctx.core.check_token(id, "not even hex!").await.unwrap());
    assert!(!ctx.core.check_token(id + 1, &token).await.unwrap());
}
