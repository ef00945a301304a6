//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for data sources, storage,
//! targets, and schedules, plus the live [`ConfigProvider`] consulted at run
//! time.

mod error;
mod provider;
mod types;
mod yaml;

pub use error::ConfigError;
pub use provider::{ConfigProvider, ConfigStore, Settings};
pub use types::{
    BackupTargetConfig, DEFAULT_DATABASE_TIMEOUT_SECS, FileConfig, RestoreTargetConfig,
    ScheduleConfig,
};
pub use yaml::YamlLoader;
