// # Shutdown
//
// Three steps, each bounded by the caller's context:
//
// 1. Stop the change monitor and wait for it
// 2. Wait for in-flight readiness attempts
// 3. Teardown: take the client out, close the event bus, destroy the client
//
// A step whose wait is cut short keeps running in the background. Teardown
// re-joins whatever step 1 and 2 left behind before it touches the client.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{FlagProvider, Inner};
use crate::context::{Context, ContextError};
use crate::error::{Error, Result};
use crate::monitor::panic_message;
use crate::traits::FlagClient;

impl FlagProvider {
    /// Shut the provider down. Terminal: `init` fails afterwards.
    ///
    /// The status flips to `NotReady` on entry. Only the first call does any
    /// work; later calls return `Ok(())` immediately.
    ///
    /// # Errors
    ///
    /// [`Error::ShutdownDeadlineExceeded`] when `ctx` fired before cleanup
    /// finished. The provider is still shut down; cleanup completes in the
    /// background and is counted by [`background_tasks`](Self::background_tasks).
    pub async fn shutdown(&self, ctx: &Context) -> Result<()> {
        match AssertUnwindSafe(self.inner.shutdown(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let err = Error::PanicRecovered(panic_message(panic.as_ref()));
                error!(error = %err, "shutdown panicked, releasing client in background");
                self.inner.recover_after_panic();
                Ok(())
            }
        }
    }
}

impl Inner {
    async fn shutdown(self: &Arc<Self>, ctx: &Context) -> Result<()> {
        if !self.gate.begin_shutdown() {
            debug!("provider already shut down");
            return Ok(());
        }
        info!(provider = %self.name, "shutting down provider");

        // Callers already attached keep their clone of the outcome
        self.init_ticket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut first_cause: Option<ContextError> = None;

        // Step 1: change monitor
        let monitor = {
            let mut slot = self.gate.write();
            self.monitor_stop.cancel();
            slot.monitor.take()
        };

        let mut leftover_monitor = None;
        if let Some(mut handle) = monitor {
            tokio::select! {
                biased;

                _ = &mut handle => debug!("change monitor stopped"),

                cause = ctx.done() => {
                    warn!(%cause, "change monitor still stopping, continuing in background");
                    first_cause.get_or_insert(cause);
                    leftover_monitor = Some(handle);
                }
            }
        }

        // Step 2: readiness attempts
        self.init_tasks.close();
        tokio::select! {
            biased;

            _ = self.init_tasks.wait() => debug!("initialization tasks finished"),

            cause = ctx.done() => {
                warn!(%cause, pending = self.init_tasks.len(), "initialization tasks still running");
                first_cause.get_or_insert(cause);
            }
        }

        // Step 3: teardown
        let teardown = self
            .teardown_tasks
            .spawn(Arc::clone(self).teardown(leftover_monitor));
        tokio::select! {
            biased;

            joined = teardown => {
                if let Err(e) = joined {
                    error!(error = %e, "teardown task failed");
                }
            }

            cause = ctx.done() => {
                warn!(%cause, "client teardown still running in background");
                first_cause.get_or_insert(cause);
            }
        }

        match first_cause {
            Some(cause) => Err(Error::ShutdownDeadlineExceeded { cause }),
            None => {
                info!(provider = %self.name, "provider shut down");
                Ok(())
            }
        }
    }

    async fn teardown(self: Arc<Self>, leftover_monitor: Option<JoinHandle<()>>) {
        self.settle(leftover_monitor).await;
        if let Some(client) = self.release_client() {
            destroy_client(client).await;
        }
    }

    /// Finish what a panicked shutdown left behind
    ///
    /// Closes the bus and takes the client out immediately; the destroy runs
    /// as a tracked teardown once the monitor and readiness attempts settle.
    fn recover_after_panic(self: &Arc<Self>) {
        self.monitor_stop.cancel();
        self.init_tasks.close();

        let monitor = self.gate.write().monitor.take();
        let Some(client) = self.release_client() else {
            return;
        };

        let inner = Arc::clone(self);
        self.teardown_tasks.spawn(async move {
            inner.settle(monitor).await;
            destroy_client(client).await;
        });
    }

    /// Wait until nothing else can be using the client
    async fn settle(&self, monitor: Option<JoinHandle<()>>) {
        if let Some(handle) = monitor
            && let Err(e) = handle.await
        {
            error!(error = %e, "change monitor task failed");
        }
        self.init_tasks.wait().await;
    }

    /// Leave the ready state for good: close the bus and take the client out
    fn release_client(&self) -> Option<Arc<dyn FlagClient>> {
        let mut slot = self.gate.write();
        slot.ready = false;
        slot.events.close();
        slot.client.take()
    }
}

async fn destroy_client(client: Arc<dyn FlagClient>) {
    let started = Instant::now();
    match tokio::task::spawn_blocking(move || client.destroy()).await {
        Ok(()) => debug!(
            duration_ms = started.elapsed().as_millis() as u64,
            "flag client destroyed"
        ),
        Err(e) => error!(error = %e, "flag client destroy failed"),
    }
}
