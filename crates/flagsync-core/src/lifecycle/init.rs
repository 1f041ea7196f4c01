// # Initialization
//
// One physical readiness attempt at a time. The first caller spawns the
// attempt as a tracked task and publishes an `InitTicket`; concurrent callers
// clone the ticket's shared outcome. The attempt itself never observes any
// caller's context: each caller races the shared outcome against its own.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{FlagProvider, Inner, ProviderStatus};
use crate::context::{Context, ContextError};
use crate::error::{Error, Result};
use crate::events::{EventKind, ProviderEvent};
use crate::monitor::ChangeMonitor;

/// Outcome of one readiness attempt, shared by every caller attached to it
pub(crate) type InitOutcome = Shared<BoxFuture<'static, Result<()>>>;

/// The in-flight readiness attempt
pub(crate) struct InitTicket {
    id: u64,
    outcome: InitOutcome,
}

impl FlagProvider {
    /// Initialize the provider
    ///
    /// Waits for the wrapped client to load its definitions, then starts the
    /// change monitor and publishes `Ready`. Returns immediately when already
    /// ready. Concurrent callers share one readiness wait.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyShutdown`] after shutdown
    /// - [`Error::InitCancelled`] when `ctx` fires before the attempt finished;
    ///   the attempt keeps running and a later `init` can still observe it
    /// - [`Error::InitTimedOut`] when the client gave up within its own bound
    /// - [`Error::ShutdownDuringInit`] when shutdown began mid-attempt
    /// - [`Error::InitFailed`] when the client reported not ready after waiting
    pub async fn init(&self, ctx: &Context) -> Result<()> {
        if self.inner.gate.is_shutdown() {
            return Err(Error::AlreadyShutdown);
        }

        if self.status() == ProviderStatus::Ready {
            debug!("provider already ready");
            return Ok(());
        }

        let outcome = self.inner.init_outcome()?;

        tokio::select! {
            biased;

            result = outcome.clone() => result,

            cause = ctx.done() => {
                // The attempt may have finished in the same instant
                match outcome.now_or_never() {
                    Some(result) => result,
                    None => Err(self.inner.abandon_attempt(cause)),
                }
            }
        }
    }
}

impl Inner {
    /// Join the in-flight attempt or start a new one
    fn init_outcome(self: &Arc<Self>) -> Result<InitOutcome> {
        let mut ticket = self
            .init_ticket
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Checked under the ticket lock: shutdown clears the ticket after setting the flag
        if self.gate.is_shutdown() {
            return Err(Error::AlreadyShutdown);
        }

        // The previous attempt may have finalized since the caller's fast path
        if self.is_ready() {
            debug!("provider became ready before joining, skipping attempt");
            return Ok(futures::future::ready(Ok(())).boxed().shared());
        }

        if let Some(existing) = ticket.as_ref() {
            debug!(ticket = existing.id, "joining in-flight initialization");
            return Ok(existing.outcome.clone());
        }

        let id = self.next_ticket_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle: JoinHandle<Result<()>> = self.init_tasks.spawn(Arc::clone(self).attempt(id));
        let outcome = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(Error::PanicRecovered(e.to_string())))
        }
        .boxed()
        .shared();

        *ticket = Some(InitTicket {
            id,
            outcome: outcome.clone(),
        });
        debug!(ticket = id, "starting initialization");
        Ok(outcome)
    }

    /// One physical readiness attempt
    async fn attempt(self: Arc<Self>, id: u64) -> Result<()> {
        let result = self.wait_and_finalize().await;

        match &result {
            Ok(flags) => {
                info!(provider = %self.name, flags_loaded = flags, "provider ready");
                self.publish(EventKind::Ready, format!("provider ready ({flags} flags loaded)"));
            }
            Err(err) => {
                warn!(error = %err, "initialization failed");
                self.publish(EventKind::Error, err.to_string());
            }
        }

        self.clear_ticket(id);
        result.map(|_| ())
    }

    async fn wait_and_finalize(self: &Arc<Self>) -> Result<usize> {
        let client = {
            let slot = self.gate.read().ok_or(Error::ShutdownDuringInit)?;
            slot.client.clone().ok_or(Error::ShutdownDuringInit)?
        };

        let timeout = self.config.ready_timeout();
        debug!(timeout_secs = timeout.as_secs(), "waiting for flag client readiness");

        let waited = tokio::task::spawn_blocking(move || client.block_until_ready(timeout))
            .await
            .map_err(|e| Error::PanicRecovered(e.to_string()))?;

        if let Err(e) = waited {
            return Err(Error::InitTimedOut {
                timeout_secs: timeout.as_secs(),
                reason: e.to_string(),
            });
        }

        self.finalize()?;

        Ok(self.ready_client().map_or(0, |client| client.snapshot().len()))
    }

    /// Mark ready and start the change monitor in one critical section
    fn finalize(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.gate.write();

        if self.gate.is_shutdown() {
            return Err(Error::ShutdownDuringInit);
        }

        let ready = slot.client.as_ref().is_some_and(|client| client.is_ready());
        if !ready {
            return Err(Error::init_failed(
                "flag client reported not ready after readiness wait",
            ));
        }

        slot.ready = true;
        if slot.monitor.is_none() {
            let monitor = ChangeMonitor::new(
                Arc::clone(&self.gate),
                self.name.clone(),
                self.config.monitor_interval(),
                self.monitor_stop.clone(),
            );
            slot.monitor = Some(tokio::spawn(monitor.run()));
        }
        Ok(())
    }

    /// Report a caller giving up on the in-flight attempt
    ///
    /// Publishes `Error` unless the attempt has meanwhile made the provider
    /// ready, so consumers never see `Error` after `Ready`.
    fn abandon_attempt(&self, cause: ContextError) -> Error {
        let err = Error::InitCancelled { cause };
        warn!(error = %err, "initialization abandoned by caller, attempt continues in background");
        if !self.is_ready() {
            self.publish(EventKind::Error, err.to_string());
        }
        err
    }

    fn clear_ticket(&self, id: u64) {
        let mut ticket = self
            .init_ticket
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if ticket.as_ref().is_some_and(|current| current.id == id) {
            *ticket = None;
        }
    }

    /// Publish through the gate; nothing is published once shutdown has begun
    pub(crate) fn publish(&self, kind: EventKind, message: impl Into<String>) {
        if let Some(slot) = self.gate.read() {
            slot.publish(ProviderEvent::new(kind, &self.name, message));
        }
    }
}
