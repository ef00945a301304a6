//! Schedule entries and next execution date calculation.
//!
//! A schedule fires for the first time at its start date and then once per
//! repeat period, aligned to the start date. The calculation takes `now` as an
//! explicit argument so it stays a pure function of its inputs.

use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::types::{ScheduleName, TargetName};

/// Errors that can occur when building schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Schedule name is empty.
    #[error("schedule name cannot be empty")]
    EmptyName,

    /// Start date could not be parsed.
    #[error("invalid start date '{0}'")]
    InvalidStartDate(String),

    /// Start date does not exist in the given timezone (DST gap).
    #[error("start date '{date}' does not exist in timezone {timezone}")]
    NonexistentLocalTime { date: String, timezone: String },

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// How often a schedule repeats after its start date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum RepeatRule {
    /// Every 24 hours.
    #[default]
    Daily,
}

impl RepeatRule {
    /// Fixed period between two consecutive executions.
    pub fn period(&self) -> TimeDelta {
        match self {
            RepeatRule::Daily => TimeDelta::days(1),
        }
    }
}

impl fmt::Display for RepeatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepeatRule::Daily => write!(f, "daily"),
        }
    }
}

/// A named recurring job made of backup and restore target references.
///
/// Targets are held by name and resolved against the live configuration each
/// time the schedule runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    name: ScheduleName,
    start_date: DateTime<Utc>,
    repeat: RepeatRule,
    backup_targets: Vec<TargetName>,
    restore_targets: Vec<TargetName>,
}

impl ScheduleEntry {
    /// Create a schedule with no targets.
    pub fn new(
        name: impl Into<ScheduleName>,
        start_date: DateTime<Utc>,
        repeat: RepeatRule,
    ) -> Result<Self, ScheduleError> {
        let name = name.into();
        if name.as_str().trim().is_empty() {
            return Err(ScheduleError::EmptyName);
        }

        Ok(Self {
            name,
            start_date,
            repeat,
            backup_targets: Vec::new(),
            restore_targets: Vec::new(),
        })
    }

    /// Append a backup target reference. Duplicates are ignored.
    pub fn with_backup_target(mut self, target: impl Into<TargetName>) -> Self {
        let target = target.into();
        if !self.backup_targets.contains(&target) {
            self.backup_targets.push(target);
        }
        self
    }

    /// Append a restore target reference. Duplicates are ignored.
    pub fn with_restore_target(mut self, target: impl Into<TargetName>) -> Self {
        let target = target.into();
        if !self.restore_targets.contains(&target) {
            self.restore_targets.push(target);
        }
        self
    }

    /// Get the schedule name.
    pub fn name(&self) -> &ScheduleName {
        &self.name
    }

    /// First instant at which the schedule is eligible to run.
    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    /// Get the repeat rule.
    pub fn repeat(&self) -> RepeatRule {
        self.repeat
    }

    /// Backup targets in execution order.
    pub fn backup_targets(&self) -> &[TargetName] {
        &self.backup_targets
    }

    /// Restore targets in execution order.
    pub fn restore_targets(&self) -> &[TargetName] {
        &self.restore_targets
    }

    /// Next instant this schedule should run, relative to `now`.
    pub fn next_execute_date(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        next_execute_date(self, now)
    }
}

/// Compute the next execution date of `schedule` as seen at `now`.
///
/// Before the start date the start date itself is returned. Afterwards the
/// result is `start_date + ceil((now - start_date) / period) * period`, which
/// is never earlier than `now` and equals `now` when `now` falls exactly on a
/// period boundary.
pub fn next_execute_date(schedule: &ScheduleEntry, now: DateTime<Utc>) -> DateTime<Utc> {
    let start = schedule.start_date;
    if now <= start {
        return start;
    }

    let period = schedule.repeat.period();
    let elapsed = now - start;

    // Whole periods, rounded down; the loop below rounds up.
    let whole = elapsed.num_seconds() / period.num_seconds();
    let mut next = i32::try_from(whole)
        .ok()
        .and_then(|n| period.checked_mul(n))
        .and_then(|offset| start.checked_add_signed(offset))
        .unwrap_or(now);

    while next < now {
        match next.checked_add_signed(period) {
            Some(later) => next = later,
            None => return now,
        }
    }

    next
}

/// Parse a start date from configuration.
///
/// Accepts RFC 3339 (`2024-01-01T02:00:00Z`, `2024-01-01T02:00:00+01:00`) or a
/// naive local date-time (`2024-01-01T02:00:00`, `2024-01-01 02:00:00`)
/// interpreted in `timezone`, which defaults to UTC.
pub fn parse_start_date(raw: &str, timezone: Option<&str>) -> Result<DateTime<Utc>, ScheduleError> {
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| ScheduleError::InvalidStartDate(raw.to_string()))?;

    let tz_name = timezone.unwrap_or("UTC");
    let tz: Tz = tz_name
        .parse()
        .map_err(|_| ScheduleError::InvalidTimezone(tz_name.to_string()))?;

    // Ambiguous local times (DST fall-back) resolve to the earlier instant.
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ScheduleError::NonexistentLocalTime {
            date: raw.to_string(),
            timezone: tz_name.to_string(),
        })
}
