//! Integration tests for the indicator and publisher tasks.
//!
//! Stepped tests drive `tick()` by hand against a [`ManualClock`];
//! threaded tests run the tasks under the supervisor with millisecond
//! intervals and assert on observed histories only.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::sleep;
use std::time::{Duration, Instant};

use seizen::adapters::ble::BleRadio;
use seizen::adapters::time::Esp32TimeAdapter;
use seizen::app::indicator::{self, IndicatorMode, IndicatorTask};
use seizen::app::link::{PeripheralLink, Value};
use seizen::app::publisher::{self, PublishOutcome, PublisherTask};
use seizen::config::{PairingConfig, SystemConfig, TaskConfig};
use seizen::drivers::task_pin::Core;
use seizen::sensors::dummy::{DummySensor, MAX_READING};
use seizen::supervisor::{PeriodicTask, TaskSpec, TaskSupervisor};

use crate::mock_hw::{ManualClock, MockLink, MockPin, ScriptedSource};

const TASK: TaskConfig = TaskConfig {
    stack_kb: 32,
    priority: 1,
    core: Core::App,
};

fn wait_until(deadline: Duration, cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(1));
    }
    cond()
}

// ── Indicator (stepped) ───────────────────────────────────────

#[test]
fn indicator_goes_to_blink_within_one_poll_after_disconnect() {
    let link = Arc::new(MockLink::default());
    let clock = Arc::new(ManualClock::default());
    let pin = MockPin::new();
    let mut task = IndicatorTask::new(pin.clone(), Arc::clone(&link), Arc::clone(&clock), 500, 100);

    link.set_connected(true);
    let pause = task.tick();
    assert_eq!(task.mode(), IndicatorMode::Steady);

    link.set_connected(false);
    clock.advance(pause.as_millis() as u64);
    task.tick();
    assert_eq!(task.mode(), IndicatorMode::Blinking);
}

#[test]
fn indicator_blink_period_tracks_config() {
    let link = Arc::new(MockLink::default());
    let clock = Arc::new(ManualClock::default());
    let pin = MockPin::new();
    let mut task = IndicatorTask::new(pin.clone(), link, Arc::clone(&clock), 250, 50);

    // Record the clock at every level change.
    let mut edges = Vec::new();
    let mut last = None;
    while clock.now() < 2_000 {
        let pause = task.tick();
        if pin.level() != last {
            last = pin.level();
            edges.push(clock.now());
        }
        clock.advance(pause.as_millis() as u64);
    }
    assert!(edges.len() >= 8);
    for pair in edges.windows(2) {
        assert_eq!(pair[1] - pair[0], 250, "edges at {:?}", edges);
    }
}

// ── Publisher (stepped) ───────────────────────────────────────

#[test]
fn publisher_pushes_only_when_connected_and_due() {
    let link = Arc::new(MockLink::default());
    let (source, control) = ScriptedSource::new();
    let mut task = PublisherTask::new(source, Arc::clone(&link), 1000);

    control.due.store(true, Ordering::SeqCst);
    assert_eq!(task.publish_once(), PublishOutcome::Disconnected);
    assert_eq!(control.generated.load(Ordering::SeqCst), 0);

    link.set_connected(true);
    assert_eq!(task.publish_once(), PublishOutcome::Published(Value::new(100)));
    assert_eq!(task.publish_once(), PublishOutcome::NotDue);

    control.due.store(true, Ordering::SeqCst);
    assert_eq!(task.publish_once(), PublishOutcome::Published(Value::new(101)));
    assert_eq!(link.pushed(), vec![Value::new(100), Value::new(101)]);
}

#[test]
fn disconnect_during_publish_tick_pushes_nothing() {
    let link = Arc::new(MockLink::default());
    let (source, control) = ScriptedSource::new();
    *control.disconnect_on_generate.lock().unwrap() = Some(Arc::clone(&link));
    let mut task = PublisherTask::new(source, Arc::clone(&link), 1000);

    link.set_connected(true);
    control.due.store(true, Ordering::SeqCst);
    assert_eq!(task.publish_once(), PublishOutcome::Disconnected);
    assert!(link.pushed().is_empty());
}

#[test]
fn publisher_survives_write_failures() {
    let link = Arc::new(MockLink::default());
    let (source, control) = ScriptedSource::new();
    let mut task = PublisherTask::new(source, Arc::clone(&link), 1000);
    link.set_connected(true);
    link.fail_writes.store(true, Ordering::SeqCst);

    control.due.store(true, Ordering::SeqCst);
    assert!(matches!(task.publish_once(), PublishOutcome::Failed(_)));
    assert_eq!(task.tick(), Duration::from_millis(1000));

    link.fail_writes.store(false, Ordering::SeqCst);
    control.due.store(true, Ordering::SeqCst);
    assert!(matches!(task.publish_once(), PublishOutcome::Published(_)));
    assert_eq!(task.failures(), 1);
    assert_eq!(task.published(), 1);
}

#[test]
fn dummy_sensor_respects_refresh_interval_through_publisher() {
    let link = Arc::new(MockLink::default());
    let clock = Arc::new(ManualClock::default());
    let sensor = DummySensor::new(Arc::clone(&clock), 3000);
    let mut task = PublisherTask::new(sensor, Arc::clone(&link), 1000);
    link.set_connected(true);

    let mut outcomes = Vec::new();
    for _ in 0..7 {
        outcomes.push(task.publish_once());
        clock.advance(1000);
    }
    // Due at t=3000 and t=6000 only.
    let published: Vec<usize> = outcomes
        .iter()
        .enumerate()
        .filter(|(_, o)| matches!(o, PublishOutcome::Published(_)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(published, vec![3, 6]);
    assert!(link.pushed().iter().all(|v| v.get() <= MAX_READING));
}

// ── Threaded under the supervisor ─────────────────────────────

#[test]
fn connected_window_never_shows_low() {
    let link = Arc::new(MockLink::default());
    link.set_connected(true);
    let pin = MockPin::new();
    let task = IndicatorTask::new(pin.clone(), Arc::clone(&link), Esp32TimeAdapter::new(), 5, 1);

    let mut sup = TaskSupervisor::new();
    sup.start(task, TaskSpec::new(indicator::TASK_NAME, TASK)).unwrap();
    assert!(wait_until(Duration::from_secs(1), || pin.writes() > 0));
    sleep(Duration::from_millis(40));
    let seen = pin.snapshot();
    sup.stop_all();

    assert!(seen.iter().all(|&level| level), "saw low while connected: {:?}", seen);
}

#[test]
fn disconnected_window_shows_both_levels() {
    let link = Arc::new(MockLink::default());
    let pin = MockPin::new();
    let task = IndicatorTask::new(pin.clone(), link, Esp32TimeAdapter::new(), 5, 1);

    let mut sup = TaskSupervisor::new();
    sup.start(task, TaskSpec::new(indicator::TASK_NAME, TASK)).unwrap();
    let blinked = wait_until(Duration::from_secs(2), || {
        let seen = pin.snapshot();
        seen.contains(&true) && seen.contains(&false)
    });
    sup.stop_all();
    assert!(blinked);
}

#[test]
fn connect_then_one_send_interval_pushes_exactly_once() {
    let radio = BleRadio::new();
    let central = radio.central();
    let link = Arc::new(PeripheralLink::new(radio, SystemConfig::default().device_name));
    link.open(&PairingConfig::default()).unwrap();

    let (source, control) = ScriptedSource::new();
    let task = PublisherTask::new(source, Arc::clone(&link), 20);
    let mut sup = TaskSupervisor::new();
    sup.start(task, TaskSpec::new(publisher::TASK_NAME, TASK)).unwrap();

    assert!(central.connect());
    control.due.store(true, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(2), || {
        control.generated.load(Ordering::SeqCst) >= 1
    }));
    // Several more send intervals with nothing due.
    sleep(Duration::from_millis(80));
    sup.stop_all();

    assert_eq!(control.generated.load(Ordering::SeqCst), 1);
    assert_eq!(central.read().as_deref(), Some(&b"100"[..]));
}

#[test]
fn no_pushes_while_disconnected() {
    let link = Arc::new(MockLink::default());
    let (source, control) = ScriptedSource::new();
    control.due.store(true, Ordering::SeqCst);
    let task = PublisherTask::new(source, Arc::clone(&link), 2);

    let mut sup = TaskSupervisor::new();
    let handle = sup.start(task, TaskSpec::new(publisher::TASK_NAME, TASK)).unwrap();
    sleep(Duration::from_millis(30));
    assert!(sup.is_running(handle));
    sup.stop(handle);

    assert!(link.pushed().is_empty());
    assert_eq!(control.generated.load(Ordering::SeqCst), 0);
}
