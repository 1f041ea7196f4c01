//! Test doubles and common utilities for lifecycle contract tests
//!
//! Every contract test drives a real `FlagProvider` against an
//! `InMemoryClient` whose readiness and destroy timings are programmed per
//! test. The test keeps a clone of the client to observe how the provider
//! used it.

#![allow(dead_code)]

use flagsync_core::client::{InMemoryClient, InMemoryClientFactory};
use flagsync_core::config::ProviderConfig;
use flagsync_core::events::{ProviderEvent, Subscription};
use flagsync_core::FlagProvider;
use std::time::Duration;
use tokio::time::Instant;

/// Configuration with the given readiness bound
pub fn test_config(ready_timeout_secs: u64) -> ProviderConfig {
    ProviderConfig::new("test-sdk-key")
        .with_ready_timeout_secs(ready_timeout_secs)
        .with_provider_name("contract-test")
}

/// Provider wrapping a clone of `client`
pub fn provider_with(client: &InMemoryClient, ready_timeout_secs: u64) -> FlagProvider {
    FlagProvider::new(
        test_config(ready_timeout_secs),
        &InMemoryClientFactory::new(client.clone()),
    )
    .expect("provider construction succeeds")
}

/// Client that becomes ready `delay` after its first readiness wait
pub fn slow_client(delay: Duration) -> InMemoryClient {
    InMemoryClient::new()
        .with_ready_delay(delay)
        .with_flag("checkout", "on")
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Every event currently queued, without waiting
pub fn drain(subscription: &Subscription) -> Vec<ProviderEvent> {
    std::iter::from_fn(|| subscription.try_recv()).collect()
}
