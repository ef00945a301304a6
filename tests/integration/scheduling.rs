//! Scheduling integration tests.
//!
//! Tests that verify the pending and in-progress maps, concurrent dispatch of
//! independent schedules, and isolation of failing schedules.

use crate::common::{
    epoch, fleet, pass_boundary, wait_for_completions, wait_for_invocations, wait_for_snapshot,
};
use chrono::{TimeDelta, TimeZone, Utc};
use dbcycle::testing::{FixedClock, RecordingHandler, ScriptedExecutorFactory, TargetScript};
use dbcycle::{EventBus, Scheduler, SchedulerHandle, SchedulerSnapshot, SchedulerState};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    handle: SchedulerHandle,
    clock: Arc<FixedClock>,
    factory: Arc<ScriptedExecutorFactory>,
    events: Arc<RecordingHandler>,
}

async fn harness(schedules: &[&str], factory: ScriptedExecutorFactory) -> Harness {
    let clock = Arc::new(FixedClock::new(epoch()));
    let factory = Arc::new(factory);
    let events = Arc::new(RecordingHandler::new());
    let bus = EventBus::new();
    bus.register(events.clone()).await;

    let handle = Scheduler::new(Arc::new(fleet(schedules)), factory.clone())
        .with_event_bus(bus)
        .with_clock(clock.clone())
        .with_tick_interval(Duration::from_millis(10))
        .spawn();

    Harness {
        handle,
        clock,
        factory,
        events,
    }
}

fn assert_partition(snapshot: &SchedulerSnapshot, names: &[&str]) {
    let pending: HashSet<&str> = snapshot.pending.keys().map(|n| n.as_str()).collect();
    let running: HashSet<&str> = snapshot.in_progress.keys().map(|n| n.as_str()).collect();
    assert!(
        pending.is_disjoint(&running),
        "schedule tracked twice: {snapshot:?}"
    );
    let all: HashSet<&str> = pending.union(&running).copied().collect();
    assert_eq!(all, names.iter().copied().collect::<HashSet<_>>());
}

#[tokio::test]
async fn test_every_schedule_is_pending_or_in_progress() {
    let names = ["orders", "users", "billing"];
    let h = harness(
        &names,
        ScriptedExecutorFactory::new()
            .with_script("users_db", TargetScript::succeed().with_delay(Duration::from_millis(300))),
    )
    .await;

    assert_partition(&h.handle.snapshot().await, &names);
    h.handle.start();
    pass_boundary(&h.clock, 1);

    let snapshot = wait_for_snapshot(&h.handle, TIMEOUT, |s| s.is_in_progress("users")).await;
    assert_partition(&snapshot, &names);

    wait_for_completions(&h.events, "users", 1, TIMEOUT).await;
    let snapshot = wait_for_snapshot(&h.handle, TIMEOUT, |s| s.in_progress.is_empty()).await;
    assert_partition(&snapshot, &names);

    let next = Utc.with_ymd_and_hms(2024, 1, 5, 2, 0, 0).unwrap();
    for name in names {
        assert_eq!(snapshot.pending.get(name), Some(&next), "{name}");
    }

    h.handle.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_due_schedules_run_concurrently() {
    let slow = || TargetScript::succeed().with_delay(Duration::from_millis(200));
    let h = harness(
        &["orders", "users"],
        ScriptedExecutorFactory::new()
            .with_script("orders_db", slow())
            .with_script("users_db", slow()),
    )
    .await;
    h.handle.start();

    let started = tokio::time::Instant::now();
    pass_boundary(&h.clock, 1);
    wait_for_completions(&h.events, "orders", 1, TIMEOUT).await;
    wait_for_completions(&h.events, "users", 1, TIMEOUT).await;

    assert_eq!(h.factory.peak_concurrency(), 2);
    assert!(
        started.elapsed() < Duration::from_millis(390),
        "schedules ran one after the other: {:?}",
        started.elapsed()
    );

    h.handle.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_schedule_never_overlaps_itself() {
    let h = harness(
        &["orders"],
        ScriptedExecutorFactory::new().with_script(
            "orders_db",
            TargetScript::succeed().with_delay(Duration::from_millis(300)),
        ),
    )
    .await;
    h.handle.start();

    pass_boundary(&h.clock, 1);
    wait_for_snapshot(&h.handle, TIMEOUT, |s| s.is_in_progress("orders")).await;

    // Several more boundaries pass while the first cycle is still running.
    pass_boundary(&h.clock, 4);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = h.handle.snapshot().await;
    assert!(snapshot.is_in_progress("orders"));
    assert!(!snapshot.is_pending("orders"));

    wait_for_completions(&h.events, "orders", 1, TIMEOUT).await;
    let snapshot = wait_for_snapshot(&h.handle, TIMEOUT, |s| s.is_pending("orders")).await;

    // Rescheduled from the completion time, not replayed for missed boundaries.
    assert_eq!(
        snapshot.pending.get("orders"),
        Some(&Utc.with_ymd_and_hms(2024, 1, 8, 2, 0, 0).unwrap())
    );
    assert_eq!(h.factory.max_concurrency("orders_db"), 1);
    assert_eq!(h.factory.invocations("orders_db"), 1);

    h.handle.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_failing_schedule_does_not_affect_others() {
    let h = harness(
        &["orders", "users"],
        ScriptedExecutorFactory::new().with_script("orders_db", TargetScript::fail("disk full")),
    )
    .await;
    h.handle.start();

    pass_boundary(&h.clock, 1);
    wait_for_completions(&h.events, "orders", 1, TIMEOUT).await;
    wait_for_completions(&h.events, "users", 1, TIMEOUT).await;
    let snapshot = wait_for_snapshot(&h.handle, TIMEOUT, |s| s.in_progress.is_empty()).await;

    let errors = h.events.schedule_errors().await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0.as_deref(), Some("orders_db"));
    assert!(errors[0].2.contains("disk full"));

    assert_eq!(h.factory.invocations("users_db"), 1);
    assert!(snapshot.is_pending("orders"));
    assert!(snapshot.is_pending("users"));

    // The failing schedule keeps its daily cadence.
    pass_boundary(&h.clock, 2);
    wait_for_invocations(&h.factory, "orders_db", 2, TIMEOUT).await;
    wait_for_completions(&h.events, "users", 2, TIMEOUT).await;

    h.handle.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_panicking_schedule_returns_to_pending() {
    let h = harness(
        &["orders"],
        ScriptedExecutorFactory::new().with_script("orders_db", TargetScript::panic("boom")),
    )
    .await;
    h.handle.start();

    pass_boundary(&h.clock, 1);
    wait_for_completions(&h.events, "orders", 1, TIMEOUT).await;
    wait_for_snapshot(&h.handle, TIMEOUT, |s| s.is_pending("orders")).await;

    let errors = h.events.schedule_errors().await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].2.contains("boom"));

    h.handle.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_stop_lets_running_schedules_finish_then_start_resumes() {
    let slow = || TargetScript::succeed().with_delay(Duration::from_millis(200));
    let h = harness(
        &["orders", "users"],
        ScriptedExecutorFactory::new()
            .with_script("orders_db", slow())
            .with_script("users_db", slow()),
    )
    .await;
    h.handle.start();

    pass_boundary(&h.clock, 1);
    wait_for_snapshot(&h.handle, TIMEOUT, |s| s.in_progress.len() == 2).await;

    h.handle.stop();
    assert_eq!(h.handle.state(), SchedulerState::Stopped);

    // Both cycles finish and return to pending even though the scheduler is stopped.
    let snapshot = wait_for_snapshot(&h.handle, TIMEOUT, |s| s.pending.len() == 2).await;
    assert!(snapshot.in_progress.is_empty());

    pass_boundary(&h.clock, 2);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.factory.invocations("orders_db"), 1);
    assert_eq!(h.factory.invocations("users_db"), 1);

    h.handle.start();
    assert_eq!(h.handle.state(), SchedulerState::Running);
    wait_for_invocations(&h.factory, "orders_db", 2, TIMEOUT).await;
    wait_for_invocations(&h.factory, "users_db", 2, TIMEOUT).await;

    h.handle.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let h = harness(&["orders"], ScriptedExecutorFactory::new()).await;

    h.handle.stop();
    assert!(!h.handle.is_running());
    h.handle.start();
    h.handle.start();
    assert!(h.handle.is_running());
    h.handle.stop();
    h.handle.stop();
    assert!(!h.handle.is_running());

    h.handle.shutdown(TIMEOUT).await.unwrap();
    assert_eq!(h.handle.state(), SchedulerState::ShutDown);
}

#[tokio::test]
async fn test_not_yet_due_schedule_waits() {
    let h = harness(&["orders"], ScriptedExecutorFactory::new()).await;
    h.handle.start();

    h.clock.set(epoch() + TimeDelta::hours(20));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.factory.invocations("orders_db"), 0);

    h.clock.advance(TimeDelta::hours(2));
    wait_for_invocations(&h.factory, "orders_db", 1, TIMEOUT).await;

    h.handle.shutdown(TIMEOUT).await.unwrap();
}
