//! dbcycle - scheduled database backup and restore cycles.
//!
//! Schedules name backup and restore targets; each target dumps (or restores)
//! one database catalog through external commands and moves the compressed
//! dump to (or from) a bucket. The [`Scheduler`] keeps every schedule either
//! pending or in progress and runs due schedules concurrently through the
//! [`JobRunner`].

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use config::{ConfigError, ConfigProvider, ConfigStore, Settings, YamlLoader};
pub use core::clock::{Clock, SystemClock};
pub use core::schedule::{RepeatRule, ScheduleEntry, ScheduleError, next_execute_date};
pub use core::target::{BackupTarget, DataSource, RestoreTarget, StorageBackend, StorageTarget};
pub use core::types::{Operation, ScheduleName, TargetName};
pub use events::{Event, EventBus, EventHandler, TargetStage, TracingHandler};
pub use execution::{
    DefaultExecutorFactory, ExecutionContext, ExecutionError, ExecutionResult, Executor,
    ExecutorFactory,
};
pub use scheduler::{
    JobRunner, RunSummary, Scheduler, SchedulerError, SchedulerHandle, SchedulerSnapshot,
    SchedulerState,
};
pub use storage::{ObjectStore, StorageError, StoreRegistry};
