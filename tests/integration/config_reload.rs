//! Live configuration integration tests.
//!
//! Tests that verify the scheduler and job runner follow configuration
//! changes made through a [`ConfigStore`] while the scheduler is running.

use crate::common::{
    epoch, fleet, fleet_yaml, pass_boundary, wait_for_completions, wait_for_invocations,
    wait_for_snapshot,
};
use chrono::{TimeZone, Utc};
use dbcycle::testing::{FixedClock, RecordingHandler, ScriptedExecutorFactory, TargetScript};
use dbcycle::{ConfigStore, EventBus, Scheduler, Settings};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_added_schedule_is_picked_up() {
    let store = Arc::new(ConfigStore::new(fleet(&["orders"])));
    let clock = Arc::new(FixedClock::new(epoch()));
    let factory = Arc::new(ScriptedExecutorFactory::new());
    let handle = Scheduler::new(store.clone(), factory.clone())
        .with_clock(clock.clone())
        .with_tick_interval(Duration::from_millis(10))
        .spawn();
    handle.start();

    store.replace(fleet(&["orders", "users"]));
    let snapshot = wait_for_snapshot(&handle, TIMEOUT, |s| s.is_pending("users")).await;
    assert_eq!(
        snapshot.pending.get("users"),
        Some(&Utc.with_ymd_and_hms(2024, 1, 4, 2, 0, 0).unwrap())
    );

    pass_boundary(&clock, 1);
    wait_for_invocations(&factory, "users_db", 1, TIMEOUT).await;

    handle.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_removed_pending_schedule_is_dropped() {
    let store = Arc::new(ConfigStore::new(fleet(&["orders", "users"])));
    let clock = Arc::new(FixedClock::new(epoch()));
    let factory = Arc::new(ScriptedExecutorFactory::new());
    let handle = Scheduler::new(store.clone(), factory.clone())
        .with_clock(clock.clone())
        .with_tick_interval(Duration::from_millis(10))
        .spawn();
    handle.start();

    store.replace(fleet(&["orders"]));
    let snapshot = wait_for_snapshot(&handle, TIMEOUT, |s| !s.is_pending("users")).await;
    assert_eq!(snapshot.len(), 1);

    pass_boundary(&clock, 1);
    wait_for_invocations(&factory, "orders_db", 1, TIMEOUT).await;
    assert_eq!(factory.invocations("users_db"), 0);

    handle.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_schedule_removed_while_running_is_dropped_on_completion() {
    let store = Arc::new(ConfigStore::new(fleet(&["orders", "users"])));
    let clock = Arc::new(FixedClock::new(epoch()));
    let events = Arc::new(RecordingHandler::new());
    let bus = EventBus::new();
    bus.register(events.clone()).await;
    let factory = Arc::new(ScriptedExecutorFactory::new().with_script(
        "users_db",
        TargetScript::succeed().with_delay(Duration::from_millis(200)),
    ));
    let handle = Scheduler::new(store.clone(), factory)
        .with_event_bus(bus)
        .with_clock(clock.clone())
        .with_tick_interval(Duration::from_millis(10))
        .spawn();
    handle.start();

    pass_boundary(&clock, 1);
    wait_for_snapshot(&handle, TIMEOUT, |s| s.is_in_progress("users")).await;
    store.replace(fleet(&["orders"]));

    wait_for_completions(&events, "users", 1, TIMEOUT).await;
    let snapshot = wait_for_snapshot(&handle, TIMEOUT, |s| s.in_progress.is_empty()).await;
    assert!(!snapshot.is_pending("users"));
    assert!(snapshot.is_pending("orders"));

    handle.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_targets_are_resolved_from_current_config() {
    let store = Arc::new(ConfigStore::new(fleet(&["orders"])));
    let clock = Arc::new(FixedClock::new(epoch()));
    let events = Arc::new(RecordingHandler::new());
    let bus = EventBus::new();
    bus.register(events.clone()).await;
    let handle = Scheduler::new(store.clone(), Arc::new(ScriptedExecutorFactory::new()))
        .with_event_bus(bus)
        .with_clock(clock.clone())
        .with_tick_interval(Duration::from_millis(10))
        .spawn();
    handle.start();

    // Same schedule, but its backup target no longer exists.
    let yaml = fleet_yaml(&["orders"])
        .replace("backup_targets: [orders_db]", "backup_targets: [gone]");
    store.replace(Settings::parse(&yaml).unwrap());

    pass_boundary(&clock, 1);
    wait_for_completions(&events, "orders", 1, TIMEOUT).await;

    let errors = events.schedule_errors().await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].0.is_none());
    assert!(errors[0].2.contains("gone"));

    handle.shutdown(TIMEOUT).await.unwrap();
}
