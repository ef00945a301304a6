//! Testing utilities for users of the dbcycle library.
//!
//! This module provides helpers for testing schedules without databases or
//! buckets:
//!
//! - [`FixedClock`]: A clock that only moves when told to
//! - [`RecordingHandler`]: An event handler that keeps every event
//! - [`ScriptedExecutorFactory`]: Builds executors whose outcome is scripted
//!   per target name

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::clock::Clock;
use crate::core::target::{BackupTarget, RestoreTarget};
use crate::core::types::{Operation, TargetName};
use crate::events::{Event, EventHandler, TargetStage};
use crate::execution::{ExecutionContext, ExecutionResult, Executor, ExecutorFactory};

/// A clock that returns a settable instant.
///
/// # Example
///
/// ```
/// use chrono::{TimeDelta, TimeZone, Utc};
/// use dbcycle::core::clock::Clock;
/// use dbcycle::testing::FixedClock;
///
/// let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
/// clock.advance(TimeDelta::hours(2));
/// assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap());
/// ```
#[derive(Debug)]
pub struct FixedClock {
    now: StdMutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: StdMutex::new(now),
        }
    }

    /// Move the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Event handler that records every event it sees.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events in emission order.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Every `ScheduleFailed` event as (target, operation, error).
    pub async fn schedule_errors(&self) -> Vec<(Option<String>, Operation, String)> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::ScheduleFailed {
                    target,
                    operation,
                    error,
                    ..
                } => Some((
                    target.as_ref().map(|t| t.to_string()),
                    *operation,
                    error.clone(),
                )),
                _ => None,
            })
            .collect()
    }

    /// Number of `ScheduleStarted` events for `schedule`.
    pub async fn started_count(&self, schedule: &str) -> usize {
        self.count(schedule, |e| matches!(e, Event::ScheduleStarted { .. }))
            .await
    }

    /// Number of `ScheduleCompleted` events for `schedule`.
    pub async fn completed_count(&self, schedule: &str) -> usize {
        self.count(schedule, |e| matches!(e, Event::ScheduleCompleted { .. }))
            .await
    }

    /// Target stages recorded for `target`, in order.
    pub async fn stages(&self, target: &str) -> Vec<TargetStage> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::Target {
                    target: name,
                    stage,
                    ..
                } if name.as_str() == target => Some(stage.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget all recorded events.
    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }

    async fn count(&self, schedule: &str, kind: impl Fn(&Event) -> bool) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| kind(e) && e.schedule().map(|s| s.as_str()) == Some(schedule))
            .count()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Succeed,
    Fail(String),
    Panic(String),
}

/// Scripted behaviour of one target.
#[derive(Debug, Clone)]
pub struct TargetScript {
    outcome: Outcome,
    delay: Duration,
}

impl TargetScript {
    /// Succeed immediately.
    pub fn succeed() -> Self {
        Self {
            outcome: Outcome::Succeed,
            delay: Duration::ZERO,
        }
    }

    /// Fail with `message`.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Fail(message.into()),
            delay: Duration::ZERO,
        }
    }

    /// Panic with `message`.
    pub fn panic(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Panic(message.into()),
            delay: Duration::ZERO,
        }
    }

    /// Sleep for `delay` before producing the outcome.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Default for TargetScript {
    fn default() -> Self {
        Self::succeed()
    }
}

#[derive(Debug, Default)]
struct Activity {
    invocations: HashMap<String, usize>,
    call_order: Vec<(Operation, String)>,
    last_timeout: Option<Duration>,
    active: HashMap<String, usize>,
    max_active: HashMap<String, usize>,
    active_total: usize,
    peak_total: usize,
}

/// Executor factory whose executors follow a per-target script.
///
/// Targets without a script succeed after emitting `Started` and `Completed`.
///
/// # Example
///
/// ```
/// use dbcycle::testing::{ScriptedExecutorFactory, TargetScript};
/// use std::time::Duration;
///
/// let factory = ScriptedExecutorFactory::new()
///     .with_script("orders", TargetScript::fail("disk full"))
///     .with_script("users", TargetScript::succeed().with_delay(Duration::from_millis(50)));
///
/// assert_eq!(factory.invocations("orders"), 0);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedExecutorFactory {
    scripts: HashMap<String, TargetScript>,
    activity: Arc<StdMutex<Activity>>,
}

impl ScriptedExecutorFactory {
    /// Create a factory where every target succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the target named `target`.
    pub fn with_script(mut self, target: impl Into<String>, script: TargetScript) -> Self {
        self.scripts.insert(target.into(), script);
        self
    }

    /// Number of executors built for `target`.
    pub fn invocations(&self, target: &str) -> usize {
        self.with_activity(|a| a.invocations.get(target).copied().unwrap_or(0))
    }

    /// Every executor built, in order.
    pub fn call_order(&self) -> Vec<(Operation, String)> {
        self.with_activity(|a| a.call_order.clone())
    }

    /// Database timeout handed to the most recent executor, in seconds.
    pub fn last_timeout_secs(&self) -> Option<u64> {
        self.with_activity(|a| a.last_timeout.map(|t| t.as_secs()))
    }

    /// Highest number of simultaneous executions of `target`.
    pub fn max_concurrency(&self, target: &str) -> usize {
        self.with_activity(|a| a.max_active.get(target).copied().unwrap_or(0))
    }

    /// Highest number of simultaneous executions across all targets.
    pub fn peak_concurrency(&self) -> usize {
        self.with_activity(|a| a.peak_total)
    }

    fn with_activity<T>(&self, f: impl FnOnce(&Activity) -> T) -> T {
        f(&self.activity.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn build(
        &self,
        operation: Operation,
        target: &TargetName,
        context: ExecutionContext,
    ) -> Box<dyn Executor> {
        {
            let mut activity = self.activity.lock().unwrap_or_else(|e| e.into_inner());
            *activity
                .invocations
                .entry(target.to_string())
                .or_default() += 1;
            activity.call_order.push((operation, target.to_string()));
            activity.last_timeout = Some(context.database_timeout);
        }

        Box::new(ScriptedExecutor {
            script: self.scripts.get(target.as_str()).cloned().unwrap_or_default(),
            target: target.to_string(),
            context,
            activity: Arc::clone(&self.activity),
        })
    }
}

impl ExecutorFactory for ScriptedExecutorFactory {
    fn backup_executor(
        &self,
        target: BackupTarget,
        context: ExecutionContext,
    ) -> Box<dyn Executor> {
        self.build(Operation::Backup, &target.name, context)
    }

    fn restore_executor(
        &self,
        target: RestoreTarget,
        context: ExecutionContext,
    ) -> Box<dyn Executor> {
        self.build(Operation::Restore, &target.name, context)
    }
}

struct ScriptedExecutor {
    script: TargetScript,
    target: String,
    context: ExecutionContext,
    activity: Arc<StdMutex<Activity>>,
}

impl ScriptedExecutor {
    fn enter(&self) {
        let mut activity = self.activity.lock().unwrap_or_else(|e| e.into_inner());
        let active = activity.active.entry(self.target.clone()).or_default();
        *active += 1;
        let current = *active;
        let max = activity.max_active.entry(self.target.clone()).or_default();
        *max = (*max).max(current);
        activity.active_total += 1;
        activity.peak_total = activity.peak_total.max(activity.active_total);
    }

    fn exit(&self) {
        let mut activity = self.activity.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(active) = activity.active.get_mut(&self.target) {
            *active = active.saturating_sub(1);
        }
        activity.active_total = activity.active_total.saturating_sub(1);
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self) -> ExecutionResult {
        self.enter();
        self.context.emitter.emit(TargetStage::Started).await;

        if !self.script.delay.is_zero() {
            tokio::time::sleep(self.script.delay).await;
        }
        self.exit();

        match &self.script.outcome {
            Outcome::Succeed => {
                self.context.emitter.emit(TargetStage::Completed).await;
                ExecutionResult::success()
            }
            Outcome::Fail(message) => ExecutionResult::failure(message.clone()),
            Outcome::Panic(message) => panic!("{message}"),
        }
    }
}
