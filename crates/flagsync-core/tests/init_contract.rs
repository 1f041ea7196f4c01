//! Lifecycle Contract Test: Initialization
//!
//! This test verifies that initialization is idempotent, deduplicated and
//! honest about its outcome under concurrent callers and expiring contexts.
//!
//! Constraints verified:
//! - Concurrent callers share exactly one readiness wait
//! - A second init on a ready provider returns at once
//! - An expired context cancels the caller, never the attempt
//! - A completed outcome wins over a context that fired in the same instant
//! - Shutdown is terminal
//!
//! If this test fails, someone has added:
//! - Per-caller readiness waits
//! - Context propagation into the non-cancelable readiness call
//! - A path that re-enters initialization after shutdown

mod common;

use common::*;
use flagsync_core::events::EventKind;
use flagsync_core::{Context, ContextError, Error, InMemoryClient, ProviderStatus};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

#[tokio::test(flavor = "multi_thread")]
async fn second_init_returns_immediately() {
    let client = slow_client(Duration::from_millis(50));
    let provider = provider_with(&client, 5);

    assert_ok!(provider.init(&Context::background()).await);
    assert_eq!(provider.status(), ProviderStatus::Ready);

    let started = Instant::now();
    assert_ok!(provider.init(&Context::background()).await);
    assert!(started.elapsed() < Duration::from_millis(50));

    // Even an expired context succeeds once ready
    let expired = Context::background();
    expired.cancel();
    assert_ok!(provider.init(&expired).await);

    assert_eq!(client.readiness_waits(), 1);
    assert_ok!(provider.shutdown(&Context::background()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_callers_share_one_readiness_wait() {
    // Scenario D: 10 callers, resource ready after ~1s
    let client = slow_client(Duration::from_secs(1));
    let provider = provider_with(&client, 10);

    let started = Instant::now();
    let callers: Vec<_> = (0..10)
        .map(|_| {
            let provider = provider.clone();
            tokio::spawn(async move {
                provider
                    .init(&Context::with_timeout(Duration::from_secs(5)))
                    .await
            })
        })
        .collect();

    for caller in callers {
        assert_ok!(caller.await.unwrap());
    }

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "finished too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "callers were serialized: {elapsed:?}");
    assert_eq!(
        client.readiness_waits(),
        1,
        "Expected exactly one readiness wait for 10 callers"
    );
    assert_ok!(provider.shutdown(&Context::background()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_context_cancels_caller_not_attempt() {
    // Scenario A: 1s context against a resource that would need 10s.
    // The client's own bound (2s) ends the attempt afterwards.
    let client = slow_client(Duration::from_secs(10));
    let provider = provider_with(&client, 2);
    let events = provider.subscribe();

    let started = Instant::now();
    let err = assert_err!(
        provider
            .init(&Context::with_timeout(Duration::from_secs(1)))
            .await
    );
    let elapsed = started.elapsed();

    assert_eq!(
        err,
        Error::InitCancelled {
            cause: ContextError::DeadlineExceeded
        }
    );
    assert!(err.is_retryable());
    assert!(elapsed >= Duration::from_millis(950));
    assert!(elapsed < Duration::from_millis(1500), "init ignored its deadline: {elapsed:?}");
    assert_eq!(provider.status(), ProviderStatus::NotReady);

    // The attempt is still running, tracked
    assert!(provider.background_tasks() >= 1);

    let cancelled = events.recv().await.unwrap();
    assert_eq!(cancelled.kind, EventKind::Error);
    assert!(cancelled.message.contains("initialization canceled"));

    // The client gives up at its own bound and the task settles
    assert!(wait_until(Duration::from_secs(3), || provider.background_tasks() == 0).await);
    assert_eq!(provider.status(), ProviderStatus::NotReady);
    assert_eq!(client.readiness_waits(), 1);

    assert_ok!(provider.shutdown(&Context::background()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn completed_outcome_beats_expiring_context() {
    // Scenario B: resource ready at 850ms, caller context expires at 900ms
    let client = slow_client(Duration::from_millis(850));
    let provider = provider_with(&client, 5);

    let result = provider
        .init(&Context::with_timeout(Duration::from_millis(900)))
        .await;

    assert_ok!(result);
    assert_eq!(provider.status(), ProviderStatus::Ready);
    assert_ok!(provider.shutdown(&Context::background()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_after_cancel_joins_pending_attempt() {
    let client = slow_client(Duration::from_millis(500));
    let provider = provider_with(&client, 5);

    let err = assert_err!(
        provider
            .init(&Context::with_timeout(Duration::from_millis(100)))
            .await
    );
    assert!(matches!(err, Error::InitCancelled { .. }));

    assert_ok!(
        provider
            .init(&Context::with_timeout(Duration::from_secs(5)))
            .await
    );
    assert_eq!(provider.status(), ProviderStatus::Ready);
    assert_eq!(client.readiness_waits(), 1, "retry must not start a second wait");

    assert_ok!(provider.shutdown(&Context::background()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn client_timeout_is_reported_and_retryable() {
    let client = InMemoryClient::new().never_ready();
    let provider = provider_with(&client, 1);
    let events = provider.subscribe();

    let err = assert_err!(provider.init(&Context::background()).await);
    assert!(
        matches!(err, Error::InitTimedOut { timeout_secs: 1, .. }),
        "unexpected error: {err:?}"
    );
    assert!(err.is_retryable());
    assert_eq!(provider.status(), ProviderStatus::NotReady);
    assert_eq!(events.recv().await.unwrap().kind, EventKind::Error);

    // A later init starts a fresh attempt
    let err = assert_err!(provider.init(&Context::background()).await);
    assert!(matches!(err, Error::InitTimedOut { .. }));
    assert_eq!(client.readiness_waits(), 2);

    assert_ok!(provider.shutdown(&Context::background()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn ready_event_is_published_once() {
    let client = slow_client(Duration::ZERO);
    let provider = provider_with(&client, 5);
    let events = provider.subscribe();

    assert_ok!(provider.init(&Context::background()).await);
    assert_ok!(provider.init(&Context::background()).await);

    let ready = events.recv().await.unwrap();
    assert_eq!(ready.kind, EventKind::Ready);
    assert_eq!(ready.provider_name, "contract-test");
    assert!(drain(&events).is_empty(), "fast path must not publish");

    assert_ok!(provider.shutdown(&Context::background()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_is_terminal() {
    let client = slow_client(Duration::ZERO);
    let provider = provider_with(&client, 5);

    assert_ok!(provider.init(&Context::background()).await);
    assert_ok!(provider.shutdown(&Context::background()).await);

    assert_eq!(provider.status(), ProviderStatus::NotReady);
    assert_eq!(
        provider.init(&Context::background()).await,
        Err(Error::AlreadyShutdown)
    );
    assert_eq!(provider.status(), ProviderStatus::NotReady);
    assert_eq!(client.readiness_waits(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_during_init_fails_the_attempt() {
    let client = slow_client(Duration::from_millis(500));
    let provider = provider_with(&client, 5);

    let initializing = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.init(&Context::background()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Shutdown waits for the in-flight attempt before destroying the client
    assert_ok!(provider.shutdown(&Context::with_timeout(Duration::from_secs(5))).await);
    assert_eq!(client.destroy_calls(), 1);

    assert_eq!(initializing.await.unwrap(), Err(Error::ShutdownDuringInit));
    assert_eq!(provider.status(), ProviderStatus::NotReady);
}
