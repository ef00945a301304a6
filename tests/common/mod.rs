//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use dbcycle::testing::{FixedClock, RecordingHandler, ScriptedExecutorFactory};
use dbcycle::{SchedulerHandle, SchedulerSnapshot, Settings};
use std::time::Duration;

/// Instant every test clock starts at.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 3, 5, 0, 0).unwrap()
}

/// First daily boundary after [`epoch`] for schedules starting at 02:00.
pub fn first_due() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 4, 2, 0, 0).unwrap()
}

/// Move `clock` just past the `n`th daily boundary after [`epoch`].
pub fn pass_boundary(clock: &FixedClock, n: i64) {
    clock.set(first_due() + TimeDelta::days(n - 1) + TimeDelta::seconds(1));
}

/// YAML for schedules that each own one backup target named `<schedule>_db`,
/// all starting 2024-01-01 02:00 UTC and repeating daily.
pub fn fleet_yaml(schedules: &[&str]) -> String {
    let mut yaml = String::from(
        r#"
data_sources:
  - name: primary
    backup_command: { program: "true" }
    restore_command: { program: "true" }
storage_targets:
  - { bucket_name: offsite, type: memory }
backup_targets:
"#,
    );
    for name in schedules {
        yaml.push_str(&format!(
            "  - {{ name: {name}_db, catalog_name: {name}, data_source: primary, bucket_name: offsite }}\n"
        ));
    }
    yaml.push_str("schedules:\n");
    for name in schedules {
        yaml.push_str(&format!(
            "  - name: {name}\n    start_date: 2024-01-01T02:00:00Z\n    backup_targets: [{name}_db]\n"
        ));
    }
    yaml
}

/// Parsed [`fleet_yaml`].
pub fn fleet(schedules: &[&str]) -> Settings {
    Settings::parse(&fleet_yaml(schedules)).unwrap()
}

/// Wait until a snapshot satisfies `condition`, polling every 10ms.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_snapshot(
    handle: &SchedulerHandle,
    timeout: Duration,
    condition: impl Fn(&SchedulerSnapshot) -> bool,
) -> SchedulerSnapshot {
    let start = tokio::time::Instant::now();
    loop {
        let snapshot = handle.snapshot().await;
        if condition(&snapshot) {
            return snapshot;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for scheduler state, last snapshot: {snapshot:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until `schedule` has completed `count` cycles.
pub async fn wait_for_completions(
    events: &RecordingHandler,
    schedule: &str,
    count: usize,
    timeout: Duration,
) {
    let start = tokio::time::Instant::now();
    loop {
        let completed = events.completed_count(schedule).await;
        if completed >= count {
            return;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for {schedule} to complete {count} time(s), saw {completed}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until `target` has been handed to an executor `count` times.
pub async fn wait_for_invocations(
    factory: &ScriptedExecutorFactory,
    target: &str,
    count: usize,
    timeout: Duration,
) {
    let start = tokio::time::Instant::now();
    loop {
        let seen = factory.invocations(target);
        if seen >= count {
            return;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for {target} to run {count} time(s), saw {seen}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
