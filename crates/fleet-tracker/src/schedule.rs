//! Recurring background jobs driven by a ticker and a cancellation token

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A job run every `period` until stopped.
///
/// Runs never overlap: the next tick is only awaited after the current run
/// finishes, and ticks missed meanwhile are skipped.
pub struct RecurringTask {
    name: &'static str,
    running: Mutex<Option<Running>>,
}

impl RecurringTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(None),
        }
    }

    /// Start the job; returns `false` if it is already running
    pub fn start<F, Fut>(&self, period: Duration, mut job: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("{} already running", self.name);
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let name = self.name;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = job() => {}
                }
            }

            debug!("{} loop exited", name);
        });

        *running = Some(Running { cancel, handle });
        info!("{} started (every {:?})", self.name, period);
        true
    }

    /// Stop the job and wait for it to wind down; returns `false` if it was not running
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().take() else {
            return false;
        };

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            warn!("{} task ended abnormally: {}", self.name, e);
        }

        info!("{} stopped", self.name);
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl Drop for RecurringTask {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
