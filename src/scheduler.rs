//! Per-session background sync worker.
//!
//! Each session gets one tokio task driven by two inputs: a periodic
//! interval tick and an mpsc command channel carrying triggers and the
//! shutdown signal. All worker state (attempt counters, the disabled flag)
//! lives on the task's stack and is never shared.
//!
//! The worker holds only a `Weak` back-reference to its session; the
//! provider is the sole owner of both, so a dropped session ends the worker
//! instead of leaking it.
//!
//! Failure policy:
//! - transport errors retry in-attempt with capped exponential backoff,
//!   giving up after a bounded number of tries (the next tick starts over)
//! - authorization failures, the offline stub, and document corruption
//!   disable the loop; an explicit trigger (e.g. after a credential
//!   refresh) re-arms it
//! - on shutdown the worker runs at most one final sync, bounded by the
//!   configured timeout, then exits

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::retry::Backoff;
use crate::session::StoreSession;

/// Commands understood by the worker task.
#[derive(Debug)]
enum Command {
    /// Run a sync as soon as possible; coalesced while one is running.
    Trigger,
    /// Run the bounded final sync and exit.
    Shutdown,
}

/// Scheduling parameters copied out of [`Config`] at spawn time.
#[derive(Clone, Debug)]
struct SchedulerConfig {
    sync_interval: Duration,
    retry_base: Duration,
    retry_cap: Duration,
    retry_max_attempts: u32,
    final_sync_timeout: Duration,
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            sync_interval: config.sync_interval,
            retry_base: config.sync_retry_base,
            retry_cap: config.sync_retry_cap,
            retry_max_attempts: config.sync_retry_max_attempts,
            final_sync_timeout: config.final_sync_timeout,
        }
    }
}

/// Owner-side handle to a running worker.
///
/// Held by the session; dropping it without [`shutdown`](Self::shutdown)
/// closes the channel and the worker exits without a final sync.
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
    join: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle").finish_non_exhaustive()
    }
}

impl SchedulerHandle {
    /// Requests an out-of-band sync.
    ///
    /// Never blocks; if the channel is full the pending commands already
    /// guarantee a re-evaluation, so dropping this one loses nothing.
    pub fn trigger(&self) {
        let _ = self.tx.try_send(Command::Trigger);
    }

    /// Signals shutdown and waits for the worker to finish its final sync.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Command::Shutdown).await;
        let _ = self.join.await;
    }
}

/// Spawns the worker task for a session.
pub(crate) fn spawn(session: &Arc<StoreSession>, config: &Config) -> SchedulerHandle {
    let (tx, rx) = mpsc::channel(8);
    let join = tokio::spawn(run_worker(
        Arc::downgrade(session),
        rx,
        SchedulerConfig::from(config),
    ));
    SchedulerHandle { tx, join }
}

async fn run_worker(
    session: Weak<StoreSession>,
    mut rx: mpsc::Receiver<Command>,
    config: SchedulerConfig,
) {
    let mut interval = tokio::time::interval(config.sync_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; consume it so the worker waits
    // a full period before its first periodic sync.
    interval.tick().await;

    let mut disabled = false;

    loop {
        let mut shutdown = false;
        let mut run = false;

        tokio::select! {
            _ = interval.tick() => {
                run = !disabled;
            }
            cmd = rx.recv() => match cmd {
                Some(Command::Trigger) => {
                    // An explicit trigger re-arms a disabled loop
                    disabled = false;
                    run = true;
                }
                Some(Command::Shutdown) | None => shutdown = true,
            }
        }

        if run {
            attempt_sync(&session, &config, &mut disabled).await;
        }

        // Coalesce: triggers that arrived during the attempt collapse into
        // a single re-run instead of queueing one sync each.
        let mut rerun = false;
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                Command::Trigger => {
                    disabled = false;
                    rerun = true;
                }
                Command::Shutdown => shutdown = true,
            }
        }

        if shutdown {
            if let Some(session) = session.upgrade() {
                session.final_sync(config.final_sync_timeout).await;
            }
            debug!("Sync worker exiting");
            return;
        }
        if rerun && !disabled {
            attempt_sync(&session, &config, &mut disabled).await;
        }
        if session.strong_count() == 0 {
            debug!("Session dropped; sync worker exiting");
            return;
        }
    }
}

/// Runs one sync attempt with bounded transport retries.
async fn attempt_sync(session: &Weak<StoreSession>, config: &SchedulerConfig, disabled: &mut bool) {
    let Some(session) = session.upgrade() else {
        return;
    };

    let mut backoff = Backoff::new(config.retry_base, config.retry_cap);
    for attempt in 1..=config.retry_max_attempts {
        match session.sync().await {
            Ok(()) => {
                if attempt > 1 {
                    info!(user = %session.user_id(), attempt, "Sync recovered after retries");
                }
                return;
            }
            Err(err) if err.is_retryable() && attempt < config.retry_max_attempts => {
                let delay = backoff.next_delay();
                warn!(
                    user = %session.user_id(),
                    attempt,
                    ?delay,
                    error = %err,
                    "Upload failed; backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) if err.disables_sync() => {
                warn!(
                    user = %session.user_id(),
                    error = %err,
                    "Sync loop disabled until re-armed"
                );
                *disabled = true;
                return;
            }
            Err(err) => {
                warn!(
                    user = %session.user_id(),
                    attempt,
                    error = %err,
                    "Sync attempt gave up; next tick will retry"
                );
                return;
            }
        }
    }
}
