//! Scheduler handle for controlling the scheduler.
//!
//! This module provides the `SchedulerHandle` type that allows external control
//! of the scheduler: start, stop, inspection, and graceful shutdown.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use super::engine::SchedulerCore;
use super::types::{SchedulerError, SchedulerSnapshot, SchedulerState};
use crate::events::EventBus;

/// Interval between checks for in-flight runs during shutdown.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle for controlling the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    core: Arc<SchedulerCore>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    poll_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SchedulerHandle {
    pub(crate) fn new(
        core: Arc<SchedulerCore>,
        shutdown_tx: watch::Sender<bool>,
        poll_task: JoinHandle<()>,
    ) -> Self {
        Self {
            core,
            shutdown_tx: Arc::new(shutdown_tx),
            poll_task: Arc::new(Mutex::new(Some(poll_task))),
        }
    }

    /// Start promoting due schedules. Idempotent.
    pub fn start(&self) {
        if !self.core.running.swap(true, Ordering::SeqCst) {
            tracing::info!("Scheduler started");
        }
    }

    /// Stop promoting due schedules. Idempotent.
    ///
    /// Schedules already in progress run to completion and return to pending.
    pub fn stop(&self) {
        if self.core.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Scheduler stopped");
        }
    }

    /// Check if the scheduler is promoting due schedules.
    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    /// Get the current scheduler state.
    pub fn state(&self) -> SchedulerState {
        if *self.shutdown_tx.borrow() {
            SchedulerState::ShutDown
        } else if self.is_running() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// Copy of the pending and in-progress maps.
    pub async fn snapshot(&self) -> SchedulerSnapshot {
        self.core.snapshot().await
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        self.core.event_bus()
    }

    /// Interval between poll loop ticks.
    pub fn tick_interval(&self) -> Duration {
        self.core.tick_interval
    }

    /// Stop promotions, end the poll loop, and wait up to `timeout` for
    /// in-progress schedules to finish.
    ///
    /// In-progress schedules are never cancelled; if they outlive the timeout
    /// they keep running in the background and an error is returned.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), SchedulerError> {
        self.stop();
        self.shutdown_tx.send_replace(true);

        if let Some(task) = self.poll_task.lock().await.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "Scheduler poll loop ended abnormally");
        }

        self.await_running_schedules(timeout).await
    }

    /// Wait for all in-progress schedules to complete with a timeout.
    async fn await_running_schedules(&self, timeout: Duration) -> Result<(), SchedulerError> {
        let running_count = self.core.slots.lock().await.in_progress.len();

        if running_count == 0 {
            tracing::info!("No running schedules to wait for during shutdown");
            return Ok(());
        }

        tracing::info!(
            "Graceful shutdown: waiting for {} running schedule(s) to complete (timeout: {:?})",
            running_count,
            timeout
        );

        let start = tokio::time::Instant::now();
        let deadline = start + timeout;

        loop {
            let remaining = self.core.slots.lock().await.in_progress.len();

            if remaining == 0 {
                tracing::info!(
                    "All running schedules completed gracefully in {:?}",
                    start.elapsed()
                );
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    "Graceful shutdown timeout ({:?}) exceeded with {} schedule(s) still running",
                    timeout,
                    remaining
                );
                return Err(SchedulerError::ShutdownTimeout { remaining, timeout });
            }

            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }
}
