//! Scheduler type definitions.
//!
//! This module contains error types, state enums, and state snapshots for the
//! scheduler.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::core::types::{Operation, ScheduleName, TargetName};

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Schedule not found.
    #[error("schedule not found: {0}")]
    ScheduleNotFound(ScheduleName),

    /// Target not found for a direct run.
    #[error("{operation} target not found: {name}")]
    TargetNotFound {
        operation: Operation,
        name: TargetName,
    },

    /// In-flight runs did not finish before the shutdown deadline.
    #[error("{remaining} schedule(s) still running after {timeout:?}")]
    ShutdownTimeout { remaining: usize, timeout: Duration },
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Due schedules are not promoted.
    Stopped,
    /// Due schedules are promoted and dispatched.
    Running,
    /// The poll loop has exited.
    ShutDown,
}

/// Copy of the scheduler's bookkeeping at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    /// Schedule name to next due instant.
    pub pending: HashMap<ScheduleName, DateTime<Utc>>,
    /// Schedule name to the instant it was promoted.
    pub in_progress: HashMap<ScheduleName, DateTime<Utc>>,
}

impl SchedulerSnapshot {
    /// Whether `name` is waiting for its due time.
    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.contains_key(name)
    }

    /// Whether `name` is currently executing.
    pub fn is_in_progress(&self, name: &str) -> bool {
        self.in_progress.contains_key(name)
    }

    /// Number of tracked schedules.
    pub fn len(&self) -> usize {
        self.pending.len() + self.in_progress.len()
    }

    /// Whether no schedule is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one schedule cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// The schedule that ran.
    pub schedule: ScheduleName,
    /// Targets that succeeded.
    pub succeeded: usize,
    /// Targets that failed or could not be resolved.
    pub failed: usize,
    /// Wall time of the cycle.
    pub duration: Duration,
}

impl RunSummary {
    /// Whether every target succeeded.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}
