//! Shared test utilities.

#![allow(dead_code, unused_imports)]

use parking_lot::Mutex;
use shell_rpc::timeout::{
    ManualClock, ResilientTimeout, TerminationReason, TimeoutConfig, TimeoutEvent,
    TimeoutEventKind, TimerDriver,
};
use std::sync::Arc;

pub type EventLog = Arc<Mutex<Vec<TimeoutEvent>>>;

/// `{base 1000, extension 500, grace 500, absolute 5000}` with a small pattern set.
pub fn scenario_config() -> TimeoutConfig {
    TimeoutConfig {
        base_timeout_ms: 1000,
        activity_extension_ms: 500,
        grace_timeout_ms: 500,
        absolute_maximum_ms: 5000,
        progress_patterns: vec![r"(?i)downloading".to_string(), r"\d+%".to_string()],
        error_patterns: vec![r"(?i)npm ERR!".to_string(), r"ENOSPC".to_string()],
        debug: false,
    }
}

/// A manual clock plus a timeout driven by it.
pub fn manual_timeout(config: TimeoutConfig) -> (Arc<ManualClock>, ResilientTimeout) {
    let clock = Arc::new(ManualClock::new());
    let driver: Arc<dyn TimerDriver> = clock.clone();
    let timeout = ResilientTimeout::new(config, driver).expect("valid config");
    (clock, timeout)
}

/// Record every event emitted by `timeout`.
pub fn record_events(timeout: &ResilientTimeout) -> EventLog {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    timeout.on_event(move |event| sink.lock().push(event.clone()));
    log
}

/// Termination reasons in the order they were emitted.
pub fn terminations(log: &EventLog) -> Vec<TerminationReason> {
    log.lock()
        .iter()
        .filter_map(|event| event.termination_reason().cloned())
        .collect()
}

pub fn kinds(log: &EventLog) -> Vec<TimeoutEventKind> {
    log.lock().iter().map(|event| event.kind()).collect()
}
