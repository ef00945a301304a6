//! Resolved runtime settings and the live configuration provider.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::error::ConfigError;
use super::types::{BackupTargetConfig, FileConfig, RestoreTargetConfig};
use super::yaml::YamlLoader;
use crate::core::schedule::{ScheduleEntry, parse_start_date};
use crate::core::target::{BackupTarget, DataSource, RestoreTarget, StorageTarget};
use crate::core::types::{Operation, ScheduleName, TargetName};

/// Source of schedules, targets, and global settings.
///
/// Every lookup goes to the live configuration, so callers must resolve by
/// name each time they need a value rather than holding on to results.
pub trait ConfigProvider: Send + Sync {
    /// All configured schedules, in file order.
    fn schedules(&self) -> Vec<ScheduleEntry>;

    /// Look up a schedule by name.
    fn schedule(&self, name: &ScheduleName) -> Option<ScheduleEntry> {
        self.schedules().into_iter().find(|s| s.name() == name)
    }

    /// Resolve a backup target by name.
    fn resolve_backup_target(&self, name: &TargetName) -> Option<BackupTarget>;

    /// Resolve a restore target by name.
    fn resolve_restore_target(&self, name: &TargetName) -> Option<RestoreTarget>;

    /// Timeout for each database command, in seconds.
    fn database_timeout_secs(&self) -> u64;

    /// Timeout for each database command.
    fn database_timeout(&self) -> Duration {
        Duration::from_secs(self.database_timeout_secs())
    }

    /// Scratch directory for the given operation.
    fn temp_dir(&self, operation: Operation) -> PathBuf;
}

/// Validated settings with schedules parsed and names indexed.
#[derive(Debug, Clone)]
pub struct Settings {
    database_timeout_secs: u64,
    backup_temp_dir: PathBuf,
    restore_temp_dir: PathBuf,
    data_sources: HashMap<String, DataSource>,
    storage_targets: HashMap<String, StorageTarget>,
    backup_targets: Vec<BackupTargetConfig>,
    restore_targets: Vec<RestoreTargetConfig>,
    schedules: Vec<ScheduleEntry>,
}

impl Settings {
    /// Build settings from a parsed configuration file.
    ///
    /// The file is expected to have passed [`YamlLoader`] validation; start
    /// dates are parsed here.
    pub fn from_file_config(config: FileConfig) -> Result<Self, ConfigError> {
        let mut schedules = Vec::with_capacity(config.schedules.len());
        for schedule in &config.schedules {
            let invalid = |source| ConfigError::InvalidSchedule {
                name: schedule.name.clone(),
                source,
            };

            let start_date = parse_start_date(&schedule.start_date, schedule.timezone.as_deref())
                .map_err(invalid)?;
            let mut entry = ScheduleEntry::new(schedule.name.as_str(), start_date, schedule.repeat)
                .map_err(invalid)?;
            for target in &schedule.backup_targets {
                entry = entry.with_backup_target(target.as_str());
            }
            for target in &schedule.restore_targets {
                entry = entry.with_restore_target(target.as_str());
            }
            schedules.push(entry);
        }

        Ok(Self {
            database_timeout_secs: config.database_timeout_secs,
            backup_temp_dir: resolve_temp_dir(config.backup_temp_dir.as_deref()),
            restore_temp_dir: resolve_temp_dir(config.restore_temp_dir.as_deref()),
            data_sources: config
                .data_sources
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
            storage_targets: config
                .storage_targets
                .into_iter()
                .map(|s| (s.bucket_name.clone(), s))
                .collect(),
            backup_targets: config.backup_targets,
            restore_targets: config.restore_targets,
            schedules,
        })
    }

    /// Load, validate, and resolve a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_config(YamlLoader::load_config(path)?)
    }

    /// Parse, validate, and resolve configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Self::from_file_config(YamlLoader::parse_config(yaml)?)
    }

    /// All schedules, in file order.
    pub fn schedules(&self) -> &[ScheduleEntry] {
        &self.schedules
    }

    /// Backup target names, in file order.
    pub fn backup_target_names(&self) -> Vec<TargetName> {
        self.backup_targets
            .iter()
            .map(|t| TargetName::new(t.name.as_str()))
            .collect()
    }

    /// Restore target names, in file order.
    pub fn restore_target_names(&self) -> Vec<TargetName> {
        self.restore_targets
            .iter()
            .map(|t| TargetName::new(t.name.as_str()))
            .collect()
    }

    /// Schedule target references that do not name a configured target.
    ///
    /// These are not rejected at load time; they fail when the schedule runs.
    pub fn dangling_references(&self) -> Vec<(ScheduleName, Operation, TargetName)> {
        let mut dangling = Vec::new();
        for schedule in &self.schedules {
            for target in schedule.backup_targets() {
                if !self.backup_targets.iter().any(|t| t.name == target.as_str()) {
                    dangling.push((schedule.name().clone(), Operation::Backup, target.clone()));
                }
            }
            for target in schedule.restore_targets() {
                if !self.restore_targets.iter().any(|t| t.name == target.as_str()) {
                    dangling.push((schedule.name().clone(), Operation::Restore, target.clone()));
                }
            }
        }
        dangling
    }

    fn data_source(&self, name: &str) -> Option<DataSource> {
        self.data_sources.get(name).cloned()
    }

    fn storage_target(&self, bucket_name: &str) -> Option<StorageTarget> {
        self.storage_targets.get(bucket_name).cloned()
    }
}

impl ConfigProvider for Settings {
    fn schedules(&self) -> Vec<ScheduleEntry> {
        self.schedules.clone()
    }

    fn schedule(&self, name: &ScheduleName) -> Option<ScheduleEntry> {
        self.schedules.iter().find(|s| s.name() == name).cloned()
    }

    fn resolve_backup_target(&self, name: &TargetName) -> Option<BackupTarget> {
        let config = self
            .backup_targets
            .iter()
            .find(|t| t.name == name.as_str())?;

        Some(BackupTarget {
            name: name.clone(),
            catalog_name: config.catalog_name.clone(),
            data_source: self.data_source(&config.data_source)?,
            storage: self.storage_target(&config.bucket_name)?,
            prefix: config.prefix.clone(),
        })
    }

    fn resolve_restore_target(&self, name: &TargetName) -> Option<RestoreTarget> {
        let config = self
            .restore_targets
            .iter()
            .find(|t| t.name == name.as_str())?;

        let restore_catalog_name = match config.restore_catalog_name.as_deref() {
            Some(n) if !n.trim().is_empty() => n.to_string(),
            _ => config.catalog_name.clone(),
        };

        Some(RestoreTarget {
            name: name.clone(),
            catalog_name: config.catalog_name.clone(),
            restore_catalog_name,
            restore_path: config.restore_path.clone(),
            data_source: self.data_source(&config.data_source)?,
            storage: self.storage_target(&config.bucket_name)?,
            prefix: config.prefix.clone(),
        })
    }

    fn database_timeout_secs(&self) -> u64 {
        self.database_timeout_secs
    }

    fn temp_dir(&self, operation: Operation) -> PathBuf {
        match operation {
            Operation::Backup => self.backup_temp_dir.clone(),
            Operation::Restore => self.restore_temp_dir.clone(),
        }
    }
}

/// Empty or unset means the system temp directory.
fn resolve_temp_dir(configured: Option<&Path>) -> PathBuf {
    match configured {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => std::env::temp_dir(),
    }
}

/// Live, swappable configuration.
///
/// Readers take a cheap snapshot of the current [`Settings`]; [`replace`]
/// swaps in new settings without disturbing lookups already in flight.
///
/// [`replace`]: ConfigStore::replace
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Arc<Settings>>,
}

impl ConfigStore {
    /// Create a store holding `settings`.
    pub fn new(settings: Settings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    /// Current settings.
    pub fn current(&self) -> Arc<Settings> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in new settings, returning the previous ones.
    pub fn replace(&self, settings: Settings) -> Arc<Settings> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(settings))
    }
}

impl ConfigProvider for ConfigStore {
    fn schedules(&self) -> Vec<ScheduleEntry> {
        self.current().schedules.clone()
    }

    fn schedule(&self, name: &ScheduleName) -> Option<ScheduleEntry> {
        ConfigProvider::schedule(self.current().as_ref(), name)
    }

    fn resolve_backup_target(&self, name: &TargetName) -> Option<BackupTarget> {
        self.current().resolve_backup_target(name)
    }

    fn resolve_restore_target(&self, name: &TargetName) -> Option<RestoreTarget> {
        self.current().resolve_restore_target(name)
    }

    fn database_timeout_secs(&self) -> u64 {
        self.current().database_timeout_secs
    }

    fn temp_dir(&self, operation: Operation) -> PathBuf {
        self.current().temp_dir(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const CONFIG: &str = r#"
database_timeout_secs: 90
restore_temp_dir: ""
data_sources:
  - name: primary
    user_id: sa
    password: secret
    backup_command: { program: dump, args: ["{catalog}", "{path}"] }
    restore_command: { program: load, args: ["{restore_catalog}", "{path}"] }
storage_targets:
  - bucket_name: offsite
    type: memory
backup_targets:
  - name: orders
    catalog_name: orders
    data_source: primary
    bucket_name: offsite
restore_targets:
  - name: orders_copy
    catalog_name: orders
    restore_path: /tmp/restore
    data_source: primary
    bucket_name: offsite
    prefix: nightly
  - name: orders_staging
    catalog_name: orders
    restore_catalog_name: orders_staging
    restore_path: /tmp/restore
    data_source: primary
    bucket_name: offsite
schedules:
  - name: nightly
    start_date: "2024-01-01 02:00:00"
    timezone: Europe/Berlin
    backup_targets: [orders, ghost]
    restore_targets: [orders_copy]
"#;

    #[test]
    fn test_schedules_are_parsed() {
        let settings = Settings::parse(CONFIG).unwrap();
        let schedules = settings.schedules();

        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].name().as_str(), "nightly");
        // Berlin is UTC+1 in January.
        assert_eq!(
            schedules[0].start_date(),
            Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()
        );
        assert_eq!(schedules[0].backup_targets().len(), 2);
    }

    #[test]
    fn test_invalid_start_date_is_reported_with_schedule_name() {
        let yaml = r#"
schedules:
  - name: broken
    start_date: next tuesday
"#;
        match Settings::parse(yaml) {
            Err(ConfigError::InvalidSchedule { name, .. }) => assert_eq!(name, "broken"),
            other => panic!("Expected InvalidSchedule error, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_backup_target() {
        let settings = Settings::parse(CONFIG).unwrap();
        let target = settings
            .resolve_backup_target(&TargetName::new("orders"))
            .unwrap();

        assert_eq!(target.catalog_name, "orders");
        assert_eq!(target.data_source.name, "primary");
        assert_eq!(target.storage.bucket_name, "offsite");
        assert!(target.prefix.is_none());

        assert!(settings.resolve_backup_target(&TargetName::new("ghost")).is_none());
    }

    #[test]
    fn test_restore_catalog_defaults_to_catalog_name() {
        let settings = Settings::parse(CONFIG).unwrap();

        let copy = settings
            .resolve_restore_target(&TargetName::new("orders_copy"))
            .unwrap();
        assert_eq!(copy.restore_catalog_name, "orders");
        assert_eq!(copy.prefix.as_deref(), Some("nightly"));

        let staging = settings
            .resolve_restore_target(&TargetName::new("orders_staging"))
            .unwrap();
        assert_eq!(staging.restore_catalog_name, "orders_staging");
    }

    #[test]
    fn test_empty_temp_dir_falls_back_to_system_temp() {
        let settings = Settings::parse(CONFIG).unwrap();
        assert_eq!(settings.temp_dir(Operation::Restore), std::env::temp_dir());
        assert_eq!(settings.temp_dir(Operation::Backup), std::env::temp_dir());
    }

    #[test]
    fn test_configured_temp_dir_is_used() {
        let settings = Settings::parse("backup_temp_dir: /var/tmp/dbcycle").unwrap();
        assert_eq!(
            settings.temp_dir(Operation::Backup),
            PathBuf::from("/var/tmp/dbcycle")
        );
    }

    #[test]
    fn test_database_timeout() {
        let settings = Settings::parse(CONFIG).unwrap();
        assert_eq!(settings.database_timeout_secs(), 90);
        assert_eq!(settings.database_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_dangling_references() {
        let settings = Settings::parse(CONFIG).unwrap();
        let dangling = settings.dangling_references();

        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].0.as_str(), "nightly");
        assert_eq!(dangling[0].1, Operation::Backup);
        assert_eq!(dangling[0].2.as_str(), "ghost");
    }

    #[test]
    fn test_target_names() {
        let settings = Settings::parse(CONFIG).unwrap();
        assert_eq!(settings.backup_target_names(), vec![TargetName::new("orders")]);
        assert_eq!(settings.restore_target_names().len(), 2);
    }

    #[test]
    fn test_config_store_replace_is_visible_to_lookups() {
        let store = ConfigStore::new(Settings::parse(CONFIG).unwrap());
        assert!(store.schedule(&ScheduleName::new("nightly")).is_some());

        let previous = store.replace(Settings::parse("database_timeout_secs: 5").unwrap());

        assert_eq!(previous.schedules().len(), 1);
        assert!(store.schedule(&ScheduleName::new("nightly")).is_none());
        assert!(store.schedules().is_empty());
        assert_eq!(store.database_timeout_secs(), 5);
    }
}
