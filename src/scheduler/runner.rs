//! Job runner: executes one schedule's targets in order.
//!
//! Backup targets run first, then restore targets, one at a time. Every target
//! is resolved against the live configuration when its turn comes. A target
//! that cannot be resolved, fails, or panics is reported and the runner moves
//! on to the next one.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use super::types::{RunSummary, SchedulerError};
use crate::config::ConfigProvider;
use crate::core::schedule::ScheduleEntry;
use crate::core::types::{Operation, ScheduleName, TargetName};
use crate::events::{Event, EventBus, TargetEmitter, TargetStage};
use crate::execution::{ExecutionContext, ExecutionResult, ExecutorFactory};

/// Result of attempting a single target.
enum TargetOutcome {
    /// The name did not resolve to a configured target.
    Unresolved,
    /// The executor ran (or panicked) and produced a result.
    Finished(ExecutionResult),
}

/// Runs schedules and individual targets.
pub struct JobRunner {
    config: Arc<dyn ConfigProvider>,
    executors: Arc<dyn ExecutorFactory>,
    event_bus: Arc<EventBus>,
}

impl JobRunner {
    /// Create a runner.
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        executors: Arc<dyn ExecutorFactory>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            executors,
            event_bus,
        }
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run one cycle of `schedule`: all backups, then all restores.
    ///
    /// Never fails; target failures are emitted as
    /// [`Event::ScheduleFailed`] and counted in the summary.
    pub async fn run(&self, schedule: &ScheduleEntry) -> RunSummary {
        let started = Instant::now();
        let name = schedule.name();

        self.event_bus
            .emit(Event::schedule_started(
                name.clone(),
                schedule.repeat(),
                schedule.start_date(),
            ))
            .await;

        let mut summary = RunSummary {
            schedule: name.clone(),
            succeeded: 0,
            failed: 0,
            duration: Default::default(),
        };

        let targets = schedule
            .backup_targets()
            .iter()
            .map(|t| (Operation::Backup, t))
            .chain(
                schedule
                    .restore_targets()
                    .iter()
                    .map(|t| (Operation::Restore, t)),
            );

        for (operation, target) in targets {
            let outcome = self.execute_target(Some(name), operation, target).await;
            match outcome {
                TargetOutcome::Finished(result) if result.success => summary.succeeded += 1,
                TargetOutcome::Finished(result) => {
                    summary.failed += 1;
                    let error = result.error.unwrap_or_else(|| "unknown error".to_string());
                    self.event_bus
                        .emit(Event::schedule_failed(
                            name.clone(),
                            Some(target.clone()),
                            operation,
                            error,
                        ))
                        .await;
                }
                TargetOutcome::Unresolved => {
                    summary.failed += 1;
                    self.event_bus
                        .emit(Event::schedule_failed(
                            name.clone(),
                            None,
                            operation,
                            format!("{operation} target '{target}' not found"),
                        ))
                        .await;
                }
            }
        }

        summary.duration = started.elapsed();
        self.event_bus
            .emit(Event::schedule_completed(name.clone(), summary.duration))
            .await;
        summary
    }

    /// Run the schedule named `name` once, outside the scheduler.
    pub async fn run_schedule(&self, name: &ScheduleName) -> Result<RunSummary, SchedulerError> {
        let schedule = self
            .config
            .schedule(name)
            .ok_or_else(|| SchedulerError::ScheduleNotFound(name.clone()))?;
        Ok(self.run(&schedule).await)
    }

    /// Back up one target directly, outside any schedule.
    pub async fn run_backup(&self, name: &TargetName) -> Result<ExecutionResult, SchedulerError> {
        self.run_direct(Operation::Backup, name).await
    }

    /// Restore one target directly, outside any schedule.
    pub async fn run_restore(&self, name: &TargetName) -> Result<ExecutionResult, SchedulerError> {
        self.run_direct(Operation::Restore, name).await
    }

    async fn run_direct(
        &self,
        operation: Operation,
        name: &TargetName,
    ) -> Result<ExecutionResult, SchedulerError> {
        match self.execute_target(None, operation, name).await {
            TargetOutcome::Unresolved => Err(SchedulerError::TargetNotFound {
                operation,
                name: name.clone(),
            }),
            TargetOutcome::Finished(result) => Ok(result),
        }
    }

    /// Resolve and execute one target, catching panics from the executor.
    async fn execute_target(
        &self,
        schedule: Option<&ScheduleName>,
        operation: Operation,
        name: &TargetName,
    ) -> TargetOutcome {
        let context = |catalog: &str| ExecutionContext {
            emitter: TargetEmitter::new(
                Arc::clone(&self.event_bus),
                schedule.cloned(),
                name.clone(),
                catalog,
                operation,
            ),
            database_timeout: self.config.database_timeout(),
            temp_dir: self.config.temp_dir(operation),
        };

        let (executor, emitter) = match operation {
            Operation::Backup => {
                let Some(target) = self.config.resolve_backup_target(name) else {
                    tracing::warn!(target_name = %name, "Backup target not found");
                    return TargetOutcome::Unresolved;
                };
                let ctx = context(&target.catalog_name);
                let emitter = ctx.emitter.clone();
                let executors = Arc::clone(&self.executors);
                let executor =
                    async move { executors.backup_executor(target, ctx).execute().await };
                (executor.boxed(), emitter)
            }
            Operation::Restore => {
                let Some(target) = self.config.resolve_restore_target(name) else {
                    tracing::warn!(target_name = %name, "Restore target not found");
                    return TargetOutcome::Unresolved;
                };
                let ctx = context(&target.catalog_name);
                let emitter = ctx.emitter.clone();
                let executors = Arc::clone(&self.executors);
                let executor =
                    async move { executors.restore_executor(target, ctx).execute().await };
                (executor.boxed(), emitter)
            }
        };

        let result = match AssertUnwindSafe(executor).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic);
                tracing::error!(
                    target_name = %name,
                    operation = %operation,
                    panic = %message,
                    "Executor panicked"
                );
                ExecutionResult::failure(format!("executor panicked: {message}"))
            }
        };

        if schedule.is_none() && !result.success {
            let error = result.error.clone().unwrap_or_default();
            emitter.emit(TargetStage::Failed { error }).await;
        }

        TargetOutcome::Finished(result)
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    }
}
