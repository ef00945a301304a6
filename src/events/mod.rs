//! Lifecycle events and event handling.
//!
//! Schedules, targets, and transfers report what they are doing through a
//! single [`Event`] type distributed by the [`EventBus`]. Events coming from an
//! executor are tagged with the schedule and target they belong to before they
//! reach any handler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::schedule::RepeatRule;
use crate::core::types::{Operation, ScheduleName, TargetName};
use crate::storage::{TransferInfo, TransferProgress};

/// Step within a single backup or restore target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStage {
    /// The database dump or restore command is starting.
    Started,
    /// The database dump or restore command finished.
    Completed,
    /// Compression of the dump is starting.
    CompressStarted,
    /// Compression finished.
    CompressCompleted,
    /// Decompression of a downloaded backup is starting.
    DecompressStarted,
    /// Decompression finished.
    DecompressCompleted,
    /// An upload or download is starting.
    TransferStarted(TransferInfo),
    /// Bytes moved during an upload or download.
    TransferProgress(TransferInfo),
    /// An upload or download finished.
    TransferCompleted(TransferInfo),
    /// The target failed outside of any schedule.
    Failed { error: String },
}

/// Lifecycle events emitted during execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A schedule cycle is starting.
    ScheduleStarted {
        schedule: ScheduleName,
        repeat: RepeatRule,
        start_date: DateTime<Utc>,
        timestamp: Instant,
    },

    /// A schedule cycle attempted all of its targets.
    ScheduleCompleted {
        schedule: ScheduleName,
        duration: Duration,
        timestamp: Instant,
    },

    /// A target within a schedule failed, or could not be resolved.
    ///
    /// `target` is `None` when the failure is not tied to one target, for
    /// example when the schedule itself could not be resolved.
    ScheduleFailed {
        schedule: ScheduleName,
        target: Option<TargetName>,
        operation: Operation,
        error: String,
        timestamp: Instant,
    },

    /// Progress of a single backup or restore target.
    ///
    /// `schedule` is `None` for targets executed directly.
    Target {
        schedule: Option<ScheduleName>,
        target: TargetName,
        catalog: String,
        operation: Operation,
        stage: TargetStage,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::ScheduleStarted { timestamp, .. } => *timestamp,
            Event::ScheduleCompleted { timestamp, .. } => *timestamp,
            Event::ScheduleFailed { timestamp, .. } => *timestamp,
            Event::Target { timestamp, .. } => *timestamp,
        }
    }

    /// Name of the schedule the event belongs to, if any.
    pub fn schedule(&self) -> Option<&ScheduleName> {
        match self {
            Event::ScheduleStarted { schedule, .. }
            | Event::ScheduleCompleted { schedule, .. }
            | Event::ScheduleFailed { schedule, .. } => Some(schedule),
            Event::Target { schedule, .. } => schedule.as_ref(),
        }
    }

    /// Create a ScheduleStarted event.
    pub fn schedule_started(
        schedule: ScheduleName,
        repeat: RepeatRule,
        start_date: DateTime<Utc>,
    ) -> Self {
        Event::ScheduleStarted {
            schedule,
            repeat,
            start_date,
            timestamp: Instant::now(),
        }
    }

    /// Create a ScheduleCompleted event.
    pub fn schedule_completed(schedule: ScheduleName, duration: Duration) -> Self {
        Event::ScheduleCompleted {
            schedule,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a ScheduleFailed event.
    pub fn schedule_failed(
        schedule: ScheduleName,
        target: Option<TargetName>,
        operation: Operation,
        error: String,
    ) -> Self {
        Event::ScheduleFailed {
            schedule,
            target,
            operation,
            error,
            timestamp: Instant::now(),
        }
    }

    /// Create a Target event.
    pub fn target(
        schedule: Option<ScheduleName>,
        target: TargetName,
        catalog: String,
        operation: Operation,
        stage: TargetStage,
    ) -> Self {
        Event::Target {
            schedule,
            target,
            catalog,
            operation,
            stage,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Emits [`Event::Target`] events for one target, tagged with its schedule.
///
/// Executors only know about their own steps; the emitter adds the schedule,
/// target, and catalog so handlers see the full context.
#[derive(Clone)]
pub struct TargetEmitter {
    bus: Arc<EventBus>,
    schedule: Option<ScheduleName>,
    target: TargetName,
    catalog: String,
    operation: Operation,
}

impl TargetEmitter {
    /// Create an emitter for `target`.
    pub fn new(
        bus: Arc<EventBus>,
        schedule: Option<ScheduleName>,
        target: TargetName,
        catalog: impl Into<String>,
        operation: Operation,
    ) -> Self {
        Self {
            bus,
            schedule,
            target,
            catalog: catalog.into(),
            operation,
        }
    }

    /// Target this emitter reports for.
    pub fn target(&self) -> &TargetName {
        &self.target
    }

    /// Emit a stage event.
    pub async fn emit(&self, stage: TargetStage) {
        self.bus
            .emit(Event::target(
                self.schedule.clone(),
                self.target.clone(),
                self.catalog.clone(),
                self.operation,
                stage,
            ))
            .await;
    }
}

#[async_trait]
impl TransferProgress for TargetEmitter {
    async fn on_progress(&self, info: TransferInfo) {
        self.emit(TargetStage::TransferProgress(info)).await;
    }
}

/// Renders every event as a `tracing` log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHandler;

impl TracingHandler {
    /// Create a new tracing handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventHandler for TracingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::ScheduleStarted {
                schedule,
                repeat,
                start_date,
                ..
            } => {
                tracing::info!(
                    schedule = %schedule,
                    repeat = %repeat,
                    start_date = %start_date,
                    "Schedule started"
                );
            }
            Event::ScheduleCompleted {
                schedule, duration, ..
            } => {
                tracing::info!(
                    schedule = %schedule,
                    duration_ms = duration.as_millis() as u64,
                    "Schedule completed"
                );
            }
            Event::ScheduleFailed {
                schedule,
                target,
                operation,
                error,
                ..
            } => {
                let target = target.as_ref().map(|t| t.as_str()).unwrap_or("-");
                tracing::error!(
                    schedule = %schedule,
                    target_name = %target,
                    operation = %operation,
                    error = %error,
                    "Schedule error"
                );
            }
            Event::Target {
                schedule,
                target,
                catalog,
                operation,
                stage,
                ..
            } => {
                let schedule = schedule.as_ref().map(|s| s.as_str()).unwrap_or("-");
                match stage {
                    TargetStage::TransferProgress(info) => {
                        tracing::debug!(
                            schedule = %schedule,
                            target_name = %target,
                            file = %info.file_name,
                            bytes = info.bytes_transferred,
                            total = info.total_bytes,
                            "Transfer progress"
                        );
                    }
                    TargetStage::TransferStarted(info) | TargetStage::TransferCompleted(info) => {
                        tracing::info!(
                            schedule = %schedule,
                            target_name = %target,
                            catalog = %catalog,
                            operation = %operation,
                            file = %info.file_name,
                            total = info.total_bytes,
                            "{}",
                            stage_label(stage)
                        );
                    }
                    TargetStage::Failed { error } => {
                        tracing::error!(
                            target_name = %target,
                            catalog = %catalog,
                            operation = %operation,
                            error = %error,
                            "Target failed"
                        );
                    }
                    _ => {
                        tracing::info!(
                            schedule = %schedule,
                            target_name = %target,
                            catalog = %catalog,
                            operation = %operation,
                            "{}",
                            stage_label(stage)
                        );
                    }
                }
            }
        }
    }
}

fn stage_label(stage: &TargetStage) -> &'static str {
    match stage {
        TargetStage::Started => "Target started",
        TargetStage::Completed => "Target completed",
        TargetStage::CompressStarted => "Compression started",
        TargetStage::CompressCompleted => "Compression completed",
        TargetStage::DecompressStarted => "Decompression started",
        TargetStage::DecompressCompleted => "Decompression completed",
        TargetStage::TransferStarted(_) => "Transfer started",
        TargetStage::TransferProgress(_) => "Transfer progress",
        TargetStage::TransferCompleted(_) => "Transfer completed",
        TargetStage::Failed { .. } => "Target failed",
    }
}
