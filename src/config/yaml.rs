//! YAML configuration parsing.
//!
//! Parses the configuration file and validates names and cross references.

use std::collections::HashSet;
use std::path::Path;

use super::error::ConfigError;
use super::types::FileConfig;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load and validate a configuration file.
    pub fn load_config(path: impl AsRef<Path>) -> Result<FileConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let config: FileConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse_config(yaml: &str) -> Result<FileConfig, ConfigError> {
        let config: FileConfig = serde_yaml::from_str(yaml)?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Validate names and cross references.
    ///
    /// Schedules may reference targets that do not exist; those are reported
    /// when the schedule runs.
    fn validate_config(config: &FileConfig) -> Result<(), ConfigError> {
        if config.database_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "database_timeout_secs cannot be zero".into(),
            ));
        }

        let data_sources = Self::unique_names(
            "data source",
            config.data_sources.iter().map(|d| d.name.as_str()),
        )?;
        for source in &config.data_sources {
            if source.backup_command.program.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "data_sources[{}].backup_command.program",
                    source.name
                )));
            }
            if source.restore_command.program.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "data_sources[{}].restore_command.program",
                    source.name
                )));
            }
        }

        let buckets = Self::unique_names(
            "storage target",
            config.storage_targets.iter().map(|s| s.bucket_name.as_str()),
        )?;

        Self::unique_names(
            "backup target",
            config.backup_targets.iter().map(|t| t.name.as_str()),
        )?;
        for target in &config.backup_targets {
            if target.catalog_name.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "backup_targets[{}].catalog_name",
                    target.name
                )));
            }
            Self::check_reference("backup target", &target.name, "data source", &target.data_source, &data_sources)?;
            Self::check_reference("backup target", &target.name, "bucket", &target.bucket_name, &buckets)?;
        }

        Self::unique_names(
            "restore target",
            config.restore_targets.iter().map(|t| t.name.as_str()),
        )?;
        for target in &config.restore_targets {
            if target.catalog_name.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "restore_targets[{}].catalog_name",
                    target.name
                )));
            }
            if target.restore_path.as_os_str().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "restore_targets[{}].restore_path",
                    target.name
                )));
            }
            Self::check_reference("restore target", &target.name, "data source", &target.data_source, &data_sources)?;
            Self::check_reference("restore target", &target.name, "bucket", &target.bucket_name, &buckets)?;
        }

        Self::unique_names("schedule", config.schedules.iter().map(|s| s.name.as_str()))?;
        for schedule in &config.schedules {
            if schedule.start_date.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "schedules[{}].start_date",
                    schedule.name
                )));
            }

            let mut seen = HashSet::new();
            for target in schedule.backup_targets.iter() {
                if !seen.insert(target) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "schedule '{}' lists backup target '{}' more than once",
                        schedule.name, target
                    )));
                }
            }

            seen.clear();
            for target in schedule.restore_targets.iter() {
                if !seen.insert(target) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "schedule '{}' lists restore target '{}' more than once",
                        schedule.name, target
                    )));
                }
            }
        }

        Ok(())
    }

    /// Check that every name is non-empty and unique, returning the set.
    fn unique_names<'a>(
        kind: &str,
        names: impl Iterator<Item = &'a str>,
    ) -> Result<HashSet<&'a str>, ConfigError> {
        let mut seen = HashSet::new();
        for name in names {
            if name.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("{kind} name")));
            }
            if !seen.insert(name) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate {kind} name: {name}"
                )));
            }
        }
        Ok(seen)
    }

    fn check_reference(
        kind: &str,
        name: &str,
        referenced_kind: &str,
        referenced: &str,
        known: &HashSet<&str>,
    ) -> Result<(), ConfigError> {
        if known.contains(referenced) {
            Ok(())
        } else {
            Err(ConfigError::InvalidConfig(format!(
                "{kind} '{name}' references unknown {referenced_kind} '{referenced}'"
            )))
        }
    }
}
