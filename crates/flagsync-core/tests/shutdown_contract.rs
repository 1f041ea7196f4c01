//! Lifecycle Contract Test: Shutdown Determinism
//!
//! This test verifies that shutdown is idempotent, bounded and leak-free.
//!
//! Constraints verified:
//! - Status reports NotReady from the moment shutdown begins
//! - Repeated shutdowns are no-ops and the client is destroyed once
//! - An expired context bounds every wait; cleanup finishes in the background
//! - The event stream ends for every subscriber
//! - Tracked background work drains to zero
//! - A running or crashed change monitor never stalls a bounded shutdown
//!
//! If this test fails, someone has added:
//! - Unbounded waits in the shutdown path
//! - Destroy calls while the readiness wait may still use the client
//! - Detached tasks that are never joined

mod common;

use common::*;
use flagsync_core::client::InMemoryClientFactory;
use flagsync_core::events::EventKind;
use flagsync_core::{Context, ContextError, Error, FlagProvider, InMemoryClient, ProviderStatus};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::assert_ok;

#[tokio::test(flavor = "multi_thread")]
async fn repeated_shutdown_is_a_noop() {
    let client = slow_client(Duration::ZERO);
    let provider = provider_with(&client, 5);
    assert_ok!(provider.init(&Context::background()).await);

    assert_ok!(provider.shutdown(&Context::background()).await);
    assert_ok!(provider.shutdown(&Context::background()).await);

    let expired = Context::background();
    expired.cancel();
    assert_ok!(provider.shutdown(&expired).await);

    assert_eq!(client.destroy_calls(), 1);
    assert!(client.is_destroyed());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_before_init_destroys_client() {
    let client = slow_client(Duration::ZERO);
    let provider = provider_with(&client, 5);

    assert_ok!(provider.shutdown(&Context::background()).await);
    assert_eq!(client.destroy_calls(), 1);
    assert_eq!(client.readiness_waits(), 0);
    assert_eq!(
        provider.init(&Context::background()).await,
        Err(Error::AlreadyShutdown)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_context_bounds_shutdown() {
    // Scenario C: shutdown with an already-cancelled context
    let client = slow_client(Duration::ZERO).with_destroy_delay(Duration::from_millis(300));
    let provider = provider_with(&client, 5);
    assert_ok!(provider.init(&Context::background()).await);
    assert!(provider.is_ready());

    let ctx = Context::background();
    ctx.cancel();

    let started = Instant::now();
    let result = provider.shutdown(&ctx).await;

    assert_eq!(
        result,
        Err(Error::ShutdownDeadlineExceeded {
            cause: ContextError::Canceled
        })
    );
    assert!(started.elapsed() < Duration::from_millis(200), "shutdown waited on destroy");
    assert_eq!(provider.status(), ProviderStatus::NotReady);

    // Teardown completes on its own
    assert!(wait_until(Duration::from_secs(2), || client.destroy_calls() == 1).await);
    assert!(wait_until(Duration::from_secs(2), || provider.background_tasks() == 0).await);
    assert!(wait_until(Duration::from_secs(2), || client.is_destroyed()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn deadline_during_teardown_is_reported() {
    let client = slow_client(Duration::ZERO).with_destroy_delay(Duration::from_millis(500));
    let provider = provider_with(&client, 5);
    assert_ok!(provider.init(&Context::background()).await);

    let result = provider
        .shutdown(&Context::with_timeout(Duration::from_millis(100)))
        .await;

    assert_eq!(
        result,
        Err(Error::ShutdownDeadlineExceeded {
            cause: ContextError::DeadlineExceeded
        })
    );
    assert!(wait_until(Duration::from_secs(2), || provider.background_tasks() == 0).await);
    assert_eq!(client.destroy_calls(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn destroy_waits_for_abandoned_init() {
    let client = slow_client(Duration::from_millis(400));
    let provider = provider_with(&client, 5);

    // Abandon init; the readiness wait keeps running
    assert!(
        provider
            .init(&Context::with_timeout(Duration::from_millis(50)))
            .await
            .is_err()
    );

    let result = provider
        .shutdown(&Context::with_timeout(Duration::from_millis(50)))
        .await;
    assert!(matches!(result, Err(Error::ShutdownDeadlineExceeded { .. })));

    // The client is not destroyed while its readiness wait is in flight
    assert_eq!(client.destroy_calls(), 0);

    assert!(wait_until(Duration::from_secs(2), || provider.background_tasks() == 0).await);
    assert_eq!(client.destroy_calls(), 1);
    assert_eq!(provider.status(), ProviderStatus::NotReady);
}

#[tokio::test(flavor = "multi_thread")]
async fn event_stream_ends_for_every_subscriber() {
    let client = slow_client(Duration::ZERO);
    let provider = provider_with(&client, 5);
    assert_ok!(provider.init(&Context::background()).await);

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let events = provider.subscribe();
            tokio::spawn(async move {
                let mut received = Vec::new();
                while let Some(event) = events.recv().await {
                    received.push(event.kind);
                }
                received
            })
        })
        .collect();

    assert_ok!(provider.shutdown(&Context::background()).await);

    let mut all = Vec::new();
    for consumer in consumers {
        let received = tokio::time::timeout(Duration::from_secs(2), consumer)
            .await
            .expect("subscriber terminates after shutdown")
            .unwrap();
        all.extend(received);
    }

    // The single Ready event went to exactly one consumer
    assert_eq!(all, vec![EventKind::Ready]);
}

#[tokio::test(flavor = "multi_thread")]
async fn no_events_after_shutdown() {
    let client = slow_client(Duration::ZERO);
    let provider = provider_with(&client, 5);
    let events = provider.subscribe();
    assert_ok!(provider.init(&Context::background()).await);
    assert_ok!(provider.shutdown(&Context::background()).await);

    client.set_flag("checkout", "off", None);

    assert_eq!(events.recv().await.map(|event| event.kind), Some(EventKind::Ready));
    assert!(events.recv().await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_shutdowns_destroy_once() {
    let client = InMemoryClient::new().with_destroy_delay(Duration::from_millis(100));
    let provider = provider_with(&client, 5);
    assert_ok!(provider.init(&Context::background()).await);

    let shutdowns: Vec<_> = (0..5)
        .map(|_| {
            let provider = provider.clone();
            tokio::spawn(async move { provider.shutdown(&Context::background()).await })
        })
        .collect();

    for shutdown in shutdowns {
        assert_ok!(shutdown.await.unwrap());
    }

    assert!(wait_until(Duration::from_secs(2), || provider.background_tasks() == 0).await);
    assert_eq!(client.destroy_calls(), 1);
}

/// Provider whose change monitor polls at the 5s floor
fn monitored_provider(client: &InMemoryClient) -> FlagProvider {
    FlagProvider::new(
        test_config(5).with_monitor_interval_secs(5),
        &InMemoryClientFactory::new(client.clone()),
    )
    .expect("provider construction succeeds")
}

#[tokio::test(flavor = "multi_thread")]
async fn running_monitor_stops_within_deadline() {
    let client = slow_client(Duration::ZERO);
    let provider = monitored_provider(&client);
    assert_ok!(provider.init(&Context::background()).await);
    assert!(provider.is_ready());

    let started = Instant::now();
    assert_ok!(provider.shutdown(&Context::with_timeout(Duration::from_secs(1))).await);
    assert!(started.elapsed() < Duration::from_secs(1), "shutdown waited on the monitor tick");

    assert_eq!(client.destroy_calls(), 1);
    assert!(wait_until(Duration::from_secs(2), || provider.background_tasks() == 0).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn crashed_monitor_does_not_stall_shutdown() {
    let client = slow_client(Duration::ZERO);
    let provider = monitored_provider(&client);
    assert_ok!(provider.init(&Context::background()).await);

    // Let the monitor take its baseline, then fail its first tick
    tokio::time::sleep(Duration::from_millis(200)).await;
    client.panic_on_snapshot_after(0);
    tokio::time::sleep(Duration::from_millis(5500)).await;
    assert_eq!(provider.status(), ProviderStatus::Ready);

    let started = Instant::now();
    assert_ok!(provider.shutdown(&Context::with_timeout(Duration::from_secs(1))).await);
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(client.destroy_calls(), 1);
    assert_eq!(provider.status(), ProviderStatus::NotReady);
}
