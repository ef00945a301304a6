//! Scheduler engine implementation.
//!
//! The scheduler tracks every configured schedule in exactly one of two maps:
//! `pending` (name to next due instant) or `in_progress` (name to the instant
//! it was promoted). A poll loop wakes every tick and, while the scheduler is
//! running:
//!
//! - Picks up schedules added to the live configuration and drops pending
//!   schedules that were removed from it
//! - Moves every due pending schedule to `in_progress` and dispatches its
//!   [`JobRunner`] cycle onto its own task
//!
//! When a cycle finishes, successfully or not, the schedule moves back to
//! `pending` with a due instant computed from the completion time. Both
//! transitions happen under the same lock, which is never held while targets
//! execute.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;

use super::handle::SchedulerHandle;
use super::runner::{JobRunner, panic_message};
use super::types::SchedulerSnapshot;
use crate::config::ConfigProvider;
use crate::core::clock::{Clock, SystemClock};
use crate::core::schedule::ScheduleEntry;
use crate::core::types::ScheduleName;
use crate::events::EventBus;
use crate::execution::ExecutorFactory;

/// Default interval between poll loop ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Smallest accepted interval between poll loop ticks.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Pending and in-progress bookkeeping. A schedule name is in exactly one map.
#[derive(Debug, Default)]
pub(crate) struct Slots {
    pub(crate) pending: HashMap<ScheduleName, DateTime<Utc>>,
    pub(crate) in_progress: HashMap<ScheduleName, DateTime<Utc>>,
}

impl Slots {
    fn contains(&self, name: &ScheduleName) -> bool {
        self.pending.contains_key(name) || self.in_progress.contains_key(name)
    }
}

/// State shared between the poll loop, dispatched cycles, and handles.
pub(crate) struct SchedulerCore {
    config: Arc<dyn ConfigProvider>,
    runner: JobRunner,
    clock: Arc<dyn Clock>,
    only: Option<HashSet<ScheduleName>>,
    pub(crate) slots: Mutex<Slots>,
    pub(crate) running: AtomicBool,
    pub(crate) tick_interval: Duration,
}

impl SchedulerCore {
    fn is_selected(&self, name: &ScheduleName) -> bool {
        self.only.as_ref().is_none_or(|only| only.contains(name))
    }

    /// Configured schedules this scheduler is responsible for.
    fn selected_schedules(&self) -> Vec<ScheduleEntry> {
        self.config
            .schedules()
            .into_iter()
            .filter(|s| self.is_selected(s.name()))
            .collect()
    }

    /// Live configuration entry for `name`, if still configured and selected.
    fn live_schedule(&self, name: &ScheduleName) -> Option<ScheduleEntry> {
        if !self.is_selected(name) {
            return None;
        }
        self.config.schedule(name)
    }

    /// Get the event bus.
    pub(crate) fn event_bus(&self) -> &Arc<EventBus> {
        self.runner.event_bus()
    }

    /// Copy both maps.
    pub(crate) async fn snapshot(&self) -> SchedulerSnapshot {
        let slots = self.slots.lock().await;
        SchedulerSnapshot {
            pending: slots.pending.clone(),
            in_progress: slots.in_progress.clone(),
        }
    }

    /// One poll loop step.
    pub(crate) async fn tick(self: &Arc<Self>) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let now = self.clock.now();
        let configured = self.selected_schedules();
        let mut slots = self.slots.lock().await;

        for entry in &configured {
            if !slots.contains(entry.name()) {
                let due = entry.next_execute_date(now);
                tracing::info!(schedule = %entry.name(), next_run = %due, "Schedule added");
                slots.pending.insert(entry.name().clone(), due);
            }
        }

        let configured_names: HashSet<&ScheduleName> =
            configured.iter().map(|s| s.name()).collect();
        slots.pending.retain(|name, _| {
            let keep = configured_names.contains(name);
            if !keep {
                tracing::warn!(schedule = %name, "Schedule no longer configured, dropping it");
            }
            keep
        });

        let mut due: Vec<(DateTime<Utc>, ScheduleName)> = slots
            .pending
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(name, at)| (*at, name.clone()))
            .collect();
        due.sort();

        for (due_at, name) in due {
            let Some(entry) = configured.iter().find(|s| s.name() == &name).cloned() else {
                continue;
            };

            slots.pending.remove(&name);
            slots.in_progress.insert(name.clone(), now);
            tracing::debug!(schedule = %name, due = %due_at, "Promoting due schedule");
            self.dispatch(entry);
        }
    }

    /// Run one cycle of `entry` on its own task.
    fn dispatch(self: &Arc<Self>, entry: ScheduleEntry) {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let name = entry.name().clone();

            if let Err(panic) = AssertUnwindSafe(core.runner.run(&entry))
                .catch_unwind()
                .await
            {
                tracing::error!(
                    schedule = %name,
                    panic = %panic_message(panic),
                    "Job runner panicked"
                );
            }

            core.complete(&name).await;
        });
    }

    /// Move a finished schedule back to pending.
    async fn complete(&self, name: &ScheduleName) {
        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        slots.in_progress.remove(name);

        match self.live_schedule(name) {
            Some(entry) => {
                let due = entry.next_execute_date(now);
                tracing::debug!(schedule = %name, next_run = %due, "Schedule rescheduled");
                slots.pending.insert(name.clone(), due);
            }
            None => {
                tracing::warn!(schedule = %name, "Schedule no longer configured, dropping it");
            }
        }
    }
}

/// Scheduler for recurring backup and restore schedules.
pub struct Scheduler {
    config: Arc<dyn ConfigProvider>,
    executors: Arc<dyn ExecutorFactory>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    only: Option<HashSet<ScheduleName>>,
}

impl Scheduler {
    /// Create a scheduler reading schedules from `config`.
    pub fn new(config: Arc<dyn ConfigProvider>, executors: Arc<dyn ExecutorFactory>) -> Self {
        Self {
            config,
            executors,
            event_bus: Arc::new(EventBus::new()),
            clock: Arc::new(SystemClock),
            tick_interval: DEFAULT_TICK_INTERVAL,
            only: None,
        }
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Arc::new(event_bus);
        self
    }

    /// Share an existing event bus.
    pub fn with_shared_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Set the tick interval. Values below [`MIN_TICK_INTERVAL`] are raised to it.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_TICK_INTERVAL {
            tracing::warn!(
                requested = ?interval,
                minimum = ?MIN_TICK_INTERVAL,
                "Tick interval too small, using minimum"
            );
        }
        self.tick_interval = interval.max(MIN_TICK_INTERVAL);
        self
    }

    /// Set the clock used for due dates.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Only track the named schedules.
    pub fn with_only_schedules<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ScheduleName>,
    {
        self.only = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Seed `pending` and launch the poll loop.
    ///
    /// The scheduler starts stopped; call [`SchedulerHandle::start`] to begin
    /// promoting due schedules. Must be called within a Tokio runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let now = self.clock.now();

        let mut slots = Slots::default();
        for entry in self.config.schedules() {
            let selected = self.only.as_ref().is_none_or(|only| only.contains(entry.name()));
            if !selected {
                continue;
            }
            let due = entry.next_execute_date(now);
            tracing::info!(schedule = %entry.name(), next_run = %due, "Schedule registered");
            slots.pending.insert(entry.name().clone(), due);
        }

        if let Some(only) = &self.only {
            for name in only {
                if !slots.contains(name) {
                    tracing::warn!(schedule = %name, "Requested schedule is not configured");
                }
            }
        }

        let core = Arc::new(SchedulerCore {
            runner: JobRunner::new(
                Arc::clone(&self.config),
                Arc::clone(&self.executors),
                Arc::clone(&self.event_bus),
            ),
            config: self.config,
            clock: self.clock,
            only: self.only,
            slots: Mutex::new(slots),
            running: AtomicBool::new(false),
            tick_interval: self.tick_interval,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poll_task = tokio::spawn(poll_loop(Arc::clone(&core), shutdown_rx));

        SchedulerHandle::new(core, shutdown_tx, poll_task)
    }
}

/// Main scheduler loop. Runs until shutdown.
async fn poll_loop(core: Arc<SchedulerCore>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(core.tick_interval.max(MIN_TICK_INTERVAL));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(panic) = AssertUnwindSafe(core.tick()).catch_unwind().await {
                    tracing::error!(panic = %panic_message(panic), "Scheduler tick panicked");
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Scheduler poll loop stopped");
}
