//! `ShellTimeout` wrapper behaviour.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use shell_rpc::integration::{ShellTimeout, ToolKind};
use shell_rpc::timeout::{ManualClock, TerminationReason, TimeoutStage, TimerDriver};

fn wrapper() -> (Arc<ManualClock>, ShellTimeout) {
    let clock = Arc::new(ManualClock::new());
    let driver: Arc<dyn TimerDriver> = clock.clone();
    (clock, ShellTimeout::new(driver))
}

fn reason_sink() -> (
    Arc<Mutex<Vec<TerminationReason>>>,
    impl FnOnce(TerminationReason) + Send + 'static,
) {
    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reasons);
    (reasons, move |reason| sink.lock().push(reason))
}

#[test]
fn start_uses_command_profile_with_caller_base() {
    let (clock, watcher) = wrapper();
    let (reasons, callback) = reason_sink();

    watcher.start("npm install express", 2000, callback).unwrap();
    let state = watcher.state().unwrap();
    assert_eq!(state.command, "npm install express");
    assert_eq!(state.tool, ToolKind::PackageInstall);
    assert_eq!(state.timeout.stage, TimeoutStage::Active);

    // Base replaced by 2000, grace capped at half of it.
    clock.advance(2000);
    assert_eq!(watcher.state().unwrap().timeout.stage, TimeoutStage::Grace);
    clock.advance(999);
    assert!(reasons.lock().is_empty());
    clock.advance(1);
    assert_eq!(*reasons.lock(), vec![TerminationReason::GracePeriodExpired]);
    assert!(!watcher.is_active());
}

#[test]
fn plain_output_never_outlasts_caller_budget() {
    let (clock, watcher) = wrapper();
    let (_reasons, callback) = reason_sink();

    // Install profile extends by 20s, far beyond a 2s budget.
    watcher.start("npm install left-pad", 2000, callback).unwrap();
    watcher.process_output("a").unwrap();

    clock.advance(100);
    watcher.process_output("plain line").unwrap();
    let plain_deadline = clock.next_deadline().unwrap();
    assert!(plain_deadline <= 100 + 2000);
    assert_eq!(plain_deadline, 100 + 1000);

    clock.advance(100);
    watcher.process_output("Downloading left-pad").unwrap();
    assert_eq!(clock.next_deadline(), Some(200 + 2000));
}

#[test]
fn long_budget_keeps_profile_windows() {
    let (clock, watcher) = wrapper();
    let (_reasons, callback) = reason_sink();

    // Uninstall extends by 10s; a 60s budget leaves that alone.
    watcher.start("pip uninstall requests", 60_000, callback).unwrap();
    watcher.process_output("a").unwrap();
    clock.advance(100);
    watcher.process_output("plain line").unwrap();
    assert_eq!(clock.next_deadline(), Some(100 + 10_000));
}

#[test]
fn absolute_maximum_raised_to_three_times_base() {
    let (clock, watcher) = wrapper();
    let (reasons, callback) = reason_sink();

    // Version probes cap at 30s; a 20s base lifts that to 60s.
    watcher.start("node --version", 20_000, callback).unwrap();
    assert_eq!(watcher.state().unwrap().tool, ToolKind::VersionProbe);

    for _ in 0..7 {
        clock.advance(10_000);
        watcher.process_output("v20.11.1").unwrap();
    }

    assert_eq!(*reasons.lock(), vec![TerminationReason::AbsoluteMaximumReached]);
    let snapshot = watcher.state().unwrap().timeout;
    assert_eq!(snapshot.elapsed_ms, 70_000);
    assert!(snapshot.terminated);
}

#[test]
fn error_output_fires_callback_once() {
    let (clock, watcher) = wrapper();
    let (reasons, callback) = reason_sink();

    watcher.start("pip install nosuchpkg", 5000, callback).unwrap();
    watcher
        .process_output("ERROR: No matching distribution found for nosuchpkg")
        .unwrap();
    watcher.process_output("npm ERR! again").unwrap();
    watcher.terminate(TerminationReason::ManualTermination);
    clock.advance(60_000);

    assert_eq!(*reasons.lock(), vec![TerminationReason::ErrorDetected]);
}

#[test]
fn terminate_passes_reason_to_callback() {
    let (_clock, watcher) = wrapper();
    let (reasons, callback) = reason_sink();

    watcher.start("make build", 5000, callback).unwrap();
    assert_eq!(watcher.state().unwrap().tool, ToolKind::Generic);
    watcher.terminate(TerminationReason::ExternalTermination);

    assert_eq!(*reasons.lock(), vec![TerminationReason::ExternalTermination]);
    assert!(!watcher.is_active());
}

#[test]
fn stop_is_idempotent_and_silences_callback() {
    let (clock, watcher) = wrapper();
    let (reasons, callback) = reason_sink();

    watcher.start("npm ci", 1000, callback).unwrap();
    watcher.process_output("added 12 packages").unwrap();
    let stats = watcher.stats().unwrap();
    assert_eq!(stats.chunks_processed, 1);

    watcher.stop();
    watcher.stop();
    assert!(!watcher.is_active());
    assert!(watcher.state().is_none());
    assert_eq!(clock.pending_count(), 0);

    clock.advance(100_000);
    assert!(reasons.lock().is_empty());
}

#[test]
fn output_without_running_timeout_is_dropped() {
    let (_clock, watcher) = wrapper();
    watcher.process_output("nobody is listening").unwrap();
    watcher.terminate(TerminationReason::ManualTermination);
    assert!(!watcher.is_active());
    assert!(watcher.stats().is_none());
}

#[test]
fn restart_tears_down_previous_timeout() {
    let (clock, watcher) = wrapper();
    let (first_reasons, first) = reason_sink();
    let (second_reasons, second) = reason_sink();

    watcher.start("npm install", 1000, first).unwrap();
    watcher.start("ls -la", 4000, second).unwrap();
    assert_eq!(watcher.state().unwrap().tool, ToolKind::QuickCommand);
    // Only the second timeout's primary and absolute timers remain.
    assert_eq!(clock.pending_count(), 2);

    clock.advance(4000 + 2000);
    assert!(first_reasons.lock().is_empty());
    assert_eq!(
        *second_reasons.lock(),
        vec![TerminationReason::GracePeriodExpired]
    );
}

#[test]
fn callback_may_stop_the_wrapper() {
    let clock = Arc::new(ManualClock::new());
    let driver: Arc<dyn TimerDriver> = clock.clone();
    let watcher = Arc::new(ShellTimeout::new(driver));
    let fired = Arc::new(Mutex::new(false));

    let inner = Arc::clone(&watcher);
    let flag = Arc::clone(&fired);
    watcher
        .start("npm install", 1000, move |_| {
            inner.stop();
            *flag.lock() = true;
        })
        .unwrap();

    watcher.process_output("ENOSPC").unwrap();
    assert!(*fired.lock());
    assert!(watcher.state().is_none());
}

#[test]
fn invalid_timeout_is_rejected() {
    let (_clock, watcher) = wrapper();
    let (_reasons, callback) = reason_sink();
    assert!(watcher.start("npm install", 0, callback).is_err());
    assert!(!watcher.is_active());
}
