//! Backup and restore integration tests.
//!
//! Tests that run real dump and restore commands (`sh`) against a local
//! directory bucket, both directly and through a schedule.

use crate::common::{epoch, pass_boundary, wait_for_completions, wait_for_snapshot};
use dbcycle::testing::{FixedClock, RecordingHandler};
use dbcycle::{
    DefaultExecutorFactory, Event, EventBus, JobRunner, Operation, Scheduler, Settings,
    TargetName, TargetStage,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

fn config(bucket: &Path, restore_dir: &Path, scratch: &Path) -> Settings {
    let yaml = format!(
        r#"
database_timeout_secs: 30
backup_temp_dir: {scratch}
restore_temp_dir: {scratch}
data_sources:
  - name: primary
    backup_command:
      program: sh
      args: ["-c", 'printf "rows of %s" "$0" > "$1"', "{{catalog}}", "{{path}}"]
    restore_command:
      program: sh
      args: ["-c", 'cp "$0" "$1/$2.restored"', "{{path}}", "{{restore_path}}", "{{restore_catalog}}"]
storage_targets:
  - bucket_name: vault
    type: local
    path: {bucket}
backup_targets:
  - name: orders_backup
    catalog_name: orders_db
    data_source: primary
    bucket_name: vault
    prefix: nightly
restore_targets:
  - name: orders_restore
    catalog_name: orders_db
    restore_catalog_name: orders_copy
    restore_path: {restore}
    data_source: primary
    bucket_name: vault
    prefix: nightly
schedules:
  - name: nightly
    start_date: 2024-01-01T02:00:00Z
    backup_targets: [orders_backup]
    restore_targets: [orders_restore]
"#,
        scratch = scratch.display(),
        bucket = bucket.display(),
        restore = restore_dir.display(),
    );
    Settings::parse(&yaml).unwrap()
}

fn bucket_keys(bucket: &Path) -> Vec<String> {
    let dir = bucket.join("nightly");
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut keys: Vec<String> = entries
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    keys.sort();
    keys
}

fn scratch_is_empty(scratch: &Path) -> bool {
    std::fs::read_dir(scratch).unwrap().next().is_none()
}

#[tokio::test]
async fn test_direct_backup_then_restore_round_trips_the_dump() {
    let bucket = tempfile::tempdir().unwrap();
    let restore_dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let restore_path = restore_dir.path().join("orders");

    let events = Arc::new(RecordingHandler::new());
    let bus = Arc::new(EventBus::new());
    bus.register(events.clone()).await;
    let runner = JobRunner::new(
        Arc::new(config(bucket.path(), &restore_path, scratch.path())),
        Arc::new(DefaultExecutorFactory::new()),
        bus,
    );

    let backup = runner
        .run_backup(&TargetName::new("orders_backup"))
        .await
        .unwrap();
    assert!(backup.success, "{:?}", backup.error);

    let keys = bucket_keys(bucket.path());
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("orders_db_"), "{keys:?}");
    assert!(keys[0].ends_with(".bak.gz"), "{keys:?}");

    let restore = runner
        .run_restore(&TargetName::new("orders_restore"))
        .await
        .unwrap();
    assert!(restore.success, "{:?}", restore.error);

    let restored = std::fs::read_to_string(restore_path.join("orders_copy.restored")).unwrap();
    assert_eq!(restored, "rows of orders_db");
    assert!(scratch_is_empty(scratch.path()));

    let restore_stages: Vec<TargetStage> = events
        .stages("orders_restore")
        .await
        .into_iter()
        .filter(|s| !matches!(s, TargetStage::TransferProgress(_)))
        .collect();
    assert!(matches!(restore_stages[0], TargetStage::TransferStarted(_)));
    assert!(matches!(restore_stages[1], TargetStage::TransferCompleted(_)));
    assert_eq!(
        &restore_stages[2..],
        &[
            TargetStage::DecompressStarted,
            TargetStage::DecompressCompleted,
            TargetStage::Started,
            TargetStage::Completed,
        ]
    );
}

#[tokio::test]
async fn test_restore_without_backups_fails() {
    let bucket = tempfile::tempdir().unwrap();
    let restore_dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();

    let runner = JobRunner::new(
        Arc::new(config(bucket.path(), restore_dir.path(), scratch.path())),
        Arc::new(DefaultExecutorFactory::new()),
        Arc::new(EventBus::new()),
    );

    let result = runner
        .run_restore(&TargetName::new("orders_restore"))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.unwrap().contains("no backup found"));
}

#[tokio::test]
async fn test_scheduled_cycle_backs_up_before_restoring() {
    let bucket = tempfile::tempdir().unwrap();
    let restore_dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let restore_path = restore_dir.path().join("orders");

    let events = Arc::new(RecordingHandler::new());
    let bus = EventBus::new();
    bus.register(events.clone()).await;
    let clock = Arc::new(FixedClock::new(epoch()));

    let handle = Scheduler::new(
        Arc::new(config(bucket.path(), &restore_path, scratch.path())),
        Arc::new(DefaultExecutorFactory::new()),
    )
    .with_event_bus(bus)
    .with_clock(clock.clone())
    .with_tick_interval(Duration::from_millis(10))
    .spawn();
    handle.start();

    pass_boundary(&clock, 1);
    wait_for_completions(&events, "nightly", 1, TIMEOUT).await;
    wait_for_snapshot(&handle, TIMEOUT, |s| s.is_pending("nightly")).await;

    assert!(events.schedule_errors().await.is_empty());
    assert_eq!(
        std::fs::read_to_string(restore_path.join("orders_copy.restored")).unwrap(),
        "rows of orders_db"
    );

    // Every backup stage precedes the first restore stage.
    let operations: Vec<Operation> = events
        .events()
        .await
        .into_iter()
        .filter_map(|e| match e {
            Event::Target { operation, .. } => Some(operation),
            _ => None,
        })
        .collect();
    let first_restore = operations
        .iter()
        .position(|op| *op == Operation::Restore)
        .unwrap();
    assert!(operations[..first_restore].iter().all(|op| *op == Operation::Backup));
    assert!(operations[first_restore..].iter().all(|op| *op == Operation::Restore));

    handle.shutdown(TIMEOUT).await.unwrap();
}
