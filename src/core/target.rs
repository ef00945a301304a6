//! Backup and restore target descriptors.
//!
//! These are the resolved forms of the target entries in the configuration
//! file. Executors are built from them.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::types::TargetName;

/// Suffix of raw database dump files.
pub const BACKUP_EXTENSION: &str = "bak";

/// An external program plus arguments.
///
/// Arguments may contain placeholders (`{catalog}`, `{path}`,
/// `{restore_catalog}`, `{restore_path}`, `{data_source}`) that are filled in
/// when the command runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Program arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a command spec.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// A database server and the commands used to dump and restore its catalogs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    /// Data source name (referenced by targets).
    pub name: String,
    /// Login user, passed to commands as `DB_USER`.
    #[serde(default)]
    pub user_id: String,
    /// Login password, passed to commands as `DB_PASSWORD`.
    #[serde(default)]
    pub password: String,
    /// Command that writes a full dump of `{catalog}` to `{path}`.
    pub backup_command: CommandSpec,
    /// Command that restores `{path}` into `{restore_catalog}`.
    pub restore_command: CommandSpec,
}

impl DataSource {
    /// Credentials to hand to child processes, if both parts are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.user_id.is_empty() || self.password.is_empty() {
            None
        } else {
            Some((&self.user_id, &self.password))
        }
    }
}

/// Where a target's backups are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageBackend {
    /// Objects are files under a local directory.
    Local {
        /// Bucket root directory.
        path: PathBuf,
    },
    /// Objects live in process memory (testing and dry runs).
    Memory,
}

/// A named bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTarget {
    /// Bucket name (referenced by targets).
    pub bucket_name: String,
    /// Backend holding the bucket.
    #[serde(flatten)]
    pub backend: StorageBackend,
}

/// A database catalog that is backed up to a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    /// Target name.
    pub name: TargetName,
    /// Catalog (database) to dump.
    pub catalog_name: String,
    /// Data source the catalog lives on.
    pub data_source: DataSource,
    /// Bucket receiving the backup.
    pub storage: StorageTarget,
    /// Optional key prefix inside the bucket.
    pub prefix: Option<String>,
}

impl BackupTarget {
    /// Object key for an uploaded file.
    pub fn object_key(&self, file_name: &str) -> String {
        join_prefix(self.prefix.as_deref(), file_name)
    }
}

/// A database catalog restored from the newest backup in a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTarget {
    /// Target name.
    pub name: TargetName,
    /// Catalog whose backups are searched for.
    pub catalog_name: String,
    /// Catalog to restore into.
    pub restore_catalog_name: String,
    /// Directory the restored database files are written to.
    pub restore_path: PathBuf,
    /// Data source to restore on.
    pub data_source: DataSource,
    /// Bucket holding the backups.
    pub storage: StorageTarget,
    /// Optional key prefix inside the bucket.
    pub prefix: Option<String>,
}

impl RestoreTarget {
    /// Key prefix used when searching for this target's backups.
    pub fn search_prefix(&self) -> String {
        let mut prefix = match self.prefix.as_deref() {
            Some(p) if !p.is_empty() => {
                if p.ends_with('/') {
                    p.to_string()
                } else {
                    format!("{p}/")
                }
            }
            _ => String::new(),
        };
        prefix.push_str(&escape_catalog_name(&self.catalog_name));
        prefix
    }

    /// Strip this target's prefix (and a following `/`) from an object key.
    pub fn relative_key<'a>(&self, key: &'a str) -> &'a str {
        let Some(prefix) = self.prefix.as_deref().filter(|p| !p.is_empty()) else {
            return key;
        };

        match key.get(..prefix.len()) {
            Some(head) if head.eq_ignore_ascii_case(prefix) => {
                let rest = &key[prefix.len()..];
                rest.strip_prefix('/').unwrap_or(rest)
            }
            _ => key,
        }
    }
}

/// Join an optional prefix and a name with exactly one `/`.
pub fn join_prefix(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => {
            if p.ends_with('/') {
                format!("{p}{name}")
            } else {
                format!("{p}/{name}")
            }
        }
        _ => name.to_string(),
    }
}

/// Make a catalog name safe for object keys and file names.
///
/// Every character outside `[A-Za-z0-9]` becomes `_`, and runs of `_` are
/// collapsed into one.
pub fn escape_catalog_name(catalog_name: &str) -> String {
    let mut escaped = String::with_capacity(catalog_name.len());
    for c in catalog_name.chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { '_' };
        if c == '_' && escaped.ends_with('_') {
            continue;
        }
        escaped.push(c);
    }
    escaped
}

/// ISO-8601 UTC timestamp with millisecond precision and `:`/`.` replaced by
/// `-`, e.g. `2024-01-03T05-00-00-000Z`.
pub fn path_safe_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// File name of a fresh backup of `catalog_name` taken at `at`.
pub fn backup_file_name(catalog_name: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}.{}",
        escape_catalog_name(catalog_name),
        path_safe_timestamp(at),
        BACKUP_EXTENSION
    )
}
