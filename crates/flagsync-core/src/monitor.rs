//! Change monitor
//!
//! Polls the client's flag snapshot on a fixed interval and publishes
//! `ConfigurationChanged` whenever the set of definitions or any change
//! number differs from the previous poll.
//!
//! The monitor owns its baseline. It reads the client only through the gate,
//! so it stops observing the client the moment shutdown begins, and it exits
//! when its stop token is cancelled.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::events::{EventKind, ProviderEvent};
use crate::gate::ReadinessGate;
use crate::traits::FlagSnapshot;

/// Background poller publishing definition changes
pub struct ChangeMonitor {
    gate: Arc<ReadinessGate>,
    provider_name: String,
    interval: Duration,
    stop: CancellationToken,
}

impl ChangeMonitor {
    /// Create a monitor
    ///
    /// `interval` is used as given; callers pass the floor-clamped value from
    /// [`ProviderConfig::monitor_interval`](crate::ProviderConfig::monitor_interval).
    pub fn new(
        gate: Arc<ReadinessGate>,
        provider_name: impl Into<String>,
        interval: Duration,
        stop: CancellationToken,
    ) -> Self {
        Self {
            gate,
            provider_name: provider_name.into(),
            interval,
            stop,
        }
    }

    /// Run until stopped. Panics inside the loop are contained and logged.
    pub async fn run(self) {
        let outcome = AssertUnwindSafe(self.poll_loop()).catch_unwind().await;
        if let Err(panic) = outcome {
            let err = Error::PanicRecovered(panic_message(panic.as_ref()));
            error!(error = %err, "change monitor panicked");
        }
        debug!("change monitor stopped");
    }

    async fn poll_loop(&self) {
        let Some(mut baseline) = self.current_snapshot() else {
            warn!("change monitor found no client, not starting");
            return;
        };

        info!(
            flags = baseline.len(),
            interval_secs = self.interval.as_secs(),
            "change monitor started"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.stop.cancelled() => return,

                _ = ticker.tick() => {
                    let Some(current) = self.current_snapshot() else {
                        return;
                    };

                    if definitions_changed(&baseline, &current) {
                        let count = current.len();
                        debug!(flags = count, "flag definitions changed");
                        self.publish_change(count);
                        baseline = current;
                    }
                }
            }
        }
    }

    fn current_snapshot(&self) -> Option<FlagSnapshot> {
        let client = self.gate.read()?.client.clone()?;
        Some(client.snapshot())
    }

    fn publish_change(&self, count: usize) {
        if let Some(slot) = self.gate.read() {
            slot.publish(ProviderEvent::new(
                EventKind::ConfigurationChanged,
                &self.provider_name,
                format!("flag definitions updated (count: {count})"),
            ));
        }
    }
}

/// Whether two snapshots describe different definitions
pub fn definitions_changed(baseline: &FlagSnapshot, current: &FlagSnapshot) -> bool {
    if baseline.len() != current.len() {
        return true;
    }
    current
        .iter()
        .any(|(name, version)| baseline.get(name) != Some(version))
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryClient;
    use crate::events::{EventBus, Subscription};
    use crate::traits::FlagClient;

    const TICK: Duration = Duration::from_millis(20);

    fn setup(client: Arc<dyn FlagClient>) -> (Arc<ReadinessGate>, Subscription) {
        let (events, subscription) = EventBus::with_capacity(8);
        (Arc::new(ReadinessGate::new(client, events)), subscription)
    }

    #[test]
    fn diff_detects_added_removed_and_bumped() {
        let base: FlagSnapshot = [("a", 1), ("b", 1)].into_iter().collect();

        let same: FlagSnapshot = [("b", 1), ("a", 1)].into_iter().collect();
        assert!(!definitions_changed(&base, &same));

        let bumped: FlagSnapshot = [("a", 2), ("b", 1)].into_iter().collect();
        assert!(definitions_changed(&base, &bumped));

        let added: FlagSnapshot = [("a", 1), ("b", 1), ("c", 1)].into_iter().collect();
        assert!(definitions_changed(&base, &added));

        let renamed: FlagSnapshot = [("a", 1), ("z", 1)].into_iter().collect();
        assert!(definitions_changed(&base, &renamed));
    }

    #[tokio::test]
    async fn publishes_on_change_and_stops_on_cancel() {
        let client = Arc::new(InMemoryClient::new());
        client.set_flag("checkout", "on", None);
        let (gate, subscription) = setup(client.clone());

        let stop = CancellationToken::new();
        let monitor = ChangeMonitor::new(gate, "test", TICK, stop.clone());
        let handle = tokio::spawn(monitor.run());

        tokio::time::sleep(TICK * 2).await;
        client.set_flag("checkout", "off", None);

        let event = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::ConfigurationChanged);
        assert_eq!(event.message, "flag definitions updated (count: 1)");

        stop.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn exits_when_gate_shuts_down() {
        let client = Arc::new(InMemoryClient::new());
        let (gate, _subscription) = setup(client);

        let monitor = ChangeMonitor::new(gate.clone(), "test", TICK, CancellationToken::new());
        let handle = tokio::spawn(monitor.run());

        gate.begin_shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn snapshot_panic_is_contained() {
        let client = Arc::new(InMemoryClient::new());
        client.panic_on_snapshot_after(1);
        let (gate, _subscription) = setup(client);

        let monitor = ChangeMonitor::new(gate, "test", TICK, CancellationToken::new());
        let result = tokio::time::timeout(Duration::from_secs(2), tokio::spawn(monitor.run())).await;

        // The task completes normally instead of surfacing the panic
        assert!(result.unwrap().is_ok());
    }
}
