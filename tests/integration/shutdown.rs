//! Graceful shutdown integration tests.
//!
//! Tests that verify the scheduler gracefully handles shutdown by waiting for
//! running schedules to complete before returning.

use crate::common::{epoch, fleet, pass_boundary, wait_for_snapshot};
use dbcycle::testing::{FixedClock, RecordingHandler, ScriptedExecutorFactory, TargetScript};
use dbcycle::{EventBus, Scheduler, SchedulerError, SchedulerState};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_shutdown_waits_for_running_schedule() {
    let clock = Arc::new(FixedClock::new(epoch()));
    let events = Arc::new(RecordingHandler::new());
    let bus = EventBus::new();
    bus.register(events.clone()).await;
    let factory = ScriptedExecutorFactory::new().with_script(
        "orders_db",
        TargetScript::succeed().with_delay(Duration::from_millis(300)),
    );

    let handle = Scheduler::new(Arc::new(fleet(&["orders"])), Arc::new(factory))
        .with_event_bus(bus)
        .with_clock(clock.clone())
        .with_tick_interval(Duration::from_millis(10))
        .spawn();
    handle.start();

    pass_boundary(&clock, 1);
    wait_for_snapshot(&handle, Duration::from_secs(5), |s| s.is_in_progress("orders")).await;

    handle.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(handle.state(), SchedulerState::ShutDown);
    assert_eq!(events.completed_count("orders").await, 1);
    let snapshot = handle.snapshot().await;
    assert!(snapshot.in_progress.is_empty());
    assert!(snapshot.is_pending("orders"));
}

#[tokio::test]
async fn test_shutdown_timeout_reports_remaining_runs() {
    let clock = Arc::new(FixedClock::new(epoch()));
    let factory = ScriptedExecutorFactory::new().with_script(
        "orders_db",
        TargetScript::succeed().with_delay(Duration::from_secs(2)),
    );

    let handle = Scheduler::new(Arc::new(fleet(&["orders", "users"])), Arc::new(factory))
        .with_clock(clock.clone())
        .with_tick_interval(Duration::from_millis(10))
        .spawn();
    handle.start();

    pass_boundary(&clock, 1);
    wait_for_snapshot(&handle, Duration::from_secs(5), |s| s.is_in_progress("orders")).await;

    let result = handle.shutdown(Duration::from_millis(200)).await;
    match result {
        Err(SchedulerError::ShutdownTimeout { remaining, .. }) => assert_eq!(remaining, 1),
        other => panic!("expected shutdown timeout, got {other:?}"),
    }

    // The run is not cancelled and still returns to pending.
    wait_for_snapshot(&handle, Duration::from_secs(5), |s| s.is_pending("orders")).await;
}

#[tokio::test]
async fn test_no_promotions_after_shutdown() {
    let clock = Arc::new(FixedClock::new(epoch()));
    let factory = Arc::new(ScriptedExecutorFactory::new());

    let handle = Scheduler::new(Arc::new(fleet(&["orders"])), factory.clone())
        .with_clock(clock.clone())
        .with_tick_interval(Duration::from_millis(10))
        .spawn();
    handle.start();
    handle.shutdown(Duration::from_secs(1)).await.unwrap();

    handle.start();
    pass_boundary(&clock, 1);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(factory.invocations("orders_db"), 0);
}
