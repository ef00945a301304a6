//! Scheduler engine for recurring backup and restore schedules.
//!
//! This module provides the polling loop that promotes due schedules, the job
//! runner that executes a schedule's targets, and the handle used to control
//! both.

mod engine;
mod handle;
mod runner;
mod types;

pub use engine::{DEFAULT_TICK_INTERVAL, MIN_TICK_INTERVAL, Scheduler};
pub use handle::SchedulerHandle;
pub use runner::JobRunner;
pub use types::{RunSummary, SchedulerError, SchedulerSnapshot, SchedulerState};
