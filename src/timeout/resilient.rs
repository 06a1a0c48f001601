//! Two-stage resilient timeout state machine.
//!
//! ```text
//!            primary fires              grace fires
//!   ACTIVE ─────────────────→ GRACE ─────────────────→ EXPIRED
//!     ↑ │                       │
//!     │ └─ output: re-arm       │ output (recovery)
//!     └─────────────────────────┘
//!
//!   error pattern, absolute timer, terminate(): any stage → EXPIRED
//! ```
//!
//! State lives behind a mutex because timer callbacks run on the driver.
//! Events produced by a transition are buffered and delivered to listeners
//! after the lock is released, in the order the transition produced them.
//!
//! Re-arming a timer schedules the replacement before cancelling the old
//! one, so a failed schedule leaves the previous timer armed. Event order
//! follows that: a grace recovery emits
//!
//! ```text
//! activity [→ pattern_match] → timer_set(primary) → timer_cleared(grace) → state_change(GRACE → ACTIVE)
//! ```
//!
//! and a termination emits `timer_cleared` for every armed timer, then
//! `state_change(→ EXPIRED)`, then `termination`.

use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::config::{TimeoutConfig, TimeoutConfigError};
use super::driver::{TimerDriver, TimerError, TimerId};
use super::error::TimeoutError;
use super::event::{EventDetails, TerminationReason, TimeoutEvent, TimeoutStage, TimerKind};
use super::patterns::{PatternActionKind, PatternMatcher};
use super::stats::TimeoutStats;
use crate::logging;

/// Callback receiving every event of one timeout.
pub type EventListener = Arc<dyn Fn(&TimeoutEvent) + Send + Sync>;

/// Point-in-time view of a timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutSnapshot {
    pub stage: TimeoutStage,
    pub start_time: u64,
    pub last_activity: u64,
    pub elapsed_ms: u64,
    pub since_last_activity_ms: u64,
    pub chunks_received: u64,
    pub terminated: bool,
    pub termination_reason: Option<TerminationReason>,
    pub primary_armed: bool,
    pub grace_armed: bool,
    pub absolute_armed: bool,
}

/// Resilient command timeout.
///
/// Owned by exactly one command executor. The executor feeds output through
/// [`process_output`](Self::process_output) and kills its process when a
/// termination event arrives; this type never touches the process itself.
pub struct ResilientTimeout {
    shared: Arc<Shared>,
}

struct Shared {
    id: Uuid,
    config: Arc<TimeoutConfig>,
    matcher: PatternMatcher,
    driver: Arc<dyn TimerDriver>,
    debug: bool,
    state: Mutex<TimeoutState>,
    listeners: Mutex<Vec<EventListener>>,
}

#[derive(Clone, Copy)]
struct ArmedTimer {
    id: TimerId,
    token: u64,
}

struct TimeoutState {
    stage: TimeoutStage,
    primary: Option<ArmedTimer>,
    grace: Option<ArmedTimer>,
    absolute: Option<ArmedTimer>,
    next_token: u64,
    start_time: u64,
    last_activity: u64,
    chunks_received: u64,
    terminated: bool,
    disposed: bool,
    termination_reason: Option<TerminationReason>,
    stats: TimeoutStats,
}

impl TimeoutState {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<ArmedTimer> {
        match kind {
            TimerKind::Primary => &mut self.primary,
            TimerKind::Grace => &mut self.grace,
            TimerKind::Absolute => &mut self.absolute,
        }
    }

    fn is_closed(&self) -> bool {
        self.terminated || self.disposed
    }
}

impl ResilientTimeout {
    /// Validate `config`, then arm the primary and absolute timers.
    pub fn new(config: TimeoutConfig, driver: Arc<dyn TimerDriver>) -> Result<Self, TimeoutError> {
        Self::with_shared_config(Arc::new(config), driver)
    }

    /// Like [`new`](Self::new) for a configuration shared between instances.
    pub fn with_shared_config(
        config: Arc<TimeoutConfig>,
        driver: Arc<dyn TimerDriver>,
    ) -> Result<Self, TimeoutError> {
        config.validate()?;
        let matcher = PatternMatcher::new(&config.progress_patterns, &config.error_patterns)
            .map_err(|err| TimeoutConfigError {
                violations: vec![err.to_string()],
            })?;

        let id = Uuid::new_v4();
        let debug = config.debug || logging::debug_enabled();
        if debug {
            for warning in config.warnings() {
                tracing::warn!(timeout_id = %id, "{}", warning);
            }
        }

        let now = driver.now_ms();
        let shared = Arc::new(Shared {
            id,
            config,
            matcher,
            driver,
            debug,
            state: Mutex::new(TimeoutState {
                stage: TimeoutStage::Active,
                primary: None,
                grace: None,
                absolute: None,
                next_token: 0,
                start_time: now,
                last_activity: now,
                chunks_received: 0,
                terminated: false,
                disposed: false,
                termination_reason: None,
                stats: TimeoutStats::default(),
            }),
            listeners: Mutex::new(Vec::new()),
        });

        let mut tx = Transition::begin(&shared);
        let base = shared.config.base_timeout_ms;
        let absolute = shared.config.absolute_maximum_ms;
        let armed = tx
            .set_timer(TimerKind::Primary, base)
            .and_then(|_| tx.set_timer(TimerKind::Absolute, absolute));
        if let Err(err) = armed {
            tx.cancel_all_silently();
            return Err(err.into());
        }
        tx.finish();

        Ok(Self { shared })
    }

    /// Unique id used to correlate log lines.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.shared.config
    }

    /// Register a listener for every subsequent event.
    pub fn on_event<F>(&self, listener: F)
    where
        F: Fn(&TimeoutEvent) + Send + Sync + 'static,
    {
        if self.shared.state.lock().is_closed() {
            return;
        }
        self.shared.listeners.lock().push(Arc::new(listener));
    }

    /// Register a listener called once with the termination reason.
    pub fn on_termination<F>(&self, listener: F)
    where
        F: Fn(&TerminationReason) + Send + Sync + 'static,
    {
        self.on_event(move |event| {
            if let Some(reason) = event.termination_reason() {
                listener(reason);
            }
        });
    }

    /// Receive events through a channel instead of a callback.
    ///
    /// The sender is dropped when the timeout terminates or is cleaned up,
    /// so the receiver ends after the final event.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TimeoutEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.on_event(move |event| {
            let _ = sender.send(event.clone());
        });
        receiver
    }

    /// Feed one chunk of process output.
    ///
    /// Silently ignored once the timeout has expired or been cleaned up.
    /// A timer failure while re-arming is returned to the caller as-is.
    pub fn process_output(&self, data: &str) -> Result<(), TimerError> {
        let started = Instant::now();
        let mut tx = Transition::begin(&self.shared);
        if tx.state.is_closed() {
            return Ok(());
        }

        let result = tx.apply_output(data);
        tx.state
            .stats
            .record_processing(started.elapsed().as_secs_f64() * 1000.0);
        tx.finish();
        result
    }

    /// Terminate with `manual_termination`.
    pub fn terminate(&self) {
        self.terminate_with(TerminationReason::ManualTermination);
    }

    /// Terminate with a caller-supplied reason. No-op once expired.
    pub fn terminate_with(&self, reason: TerminationReason) {
        let mut tx = Transition::begin(&self.shared);
        if tx.state.is_closed() {
            return;
        }
        tx.terminate(reason);
        tx.finish();
    }

    /// Dispose the timeout: clear timers and detach listeners.
    ///
    /// Counts as a completion when the timeout had not terminated. Idempotent.
    pub fn cleanup(&self) {
        let mut tx = Transition::begin(&self.shared);
        if tx.state.disposed {
            return;
        }
        if !tx.state.terminated {
            tx.state.stats.completions += 1;
            for kind in [TimerKind::Primary, TimerKind::Grace, TimerKind::Absolute] {
                tx.clear_timer(kind);
            }
            tx.change_stage(TimeoutStage::Expired, "cleanup");
        }
        tx.state.disposed = true;
        tx.finish();
    }

    pub fn stage(&self) -> TimeoutStage {
        self.shared.state.lock().stage
    }

    /// True until terminated or cleaned up.
    pub fn is_active(&self) -> bool {
        !self.shared.state.lock().is_closed()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.state.lock().terminated
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.shared.state.lock().termination_reason.clone()
    }

    pub fn snapshot(&self) -> TimeoutSnapshot {
        let now = self.shared.driver.now_ms();
        let state = self.shared.state.lock();
        TimeoutSnapshot {
            stage: state.stage,
            start_time: state.start_time,
            last_activity: state.last_activity,
            elapsed_ms: now.saturating_sub(state.start_time),
            since_last_activity_ms: now.saturating_sub(state.last_activity),
            chunks_received: state.chunks_received,
            terminated: state.terminated,
            termination_reason: state.termination_reason.clone(),
            primary_armed: state.primary.is_some(),
            grace_armed: state.grace.is_some(),
            absolute_armed: state.absolute.is_some(),
        }
    }

    pub fn stats(&self) -> TimeoutStats {
        self.shared.state.lock().stats.clone()
    }
}

impl Drop for ResilientTimeout {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        for kind in [TimerKind::Primary, TimerKind::Grace, TimerKind::Absolute] {
            if let Some(timer) = state.slot(kind).take() {
                self.shared.driver.cancel(timer.id);
            }
        }
    }
}

impl std::fmt::Debug for ResilientTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientTimeout")
            .field("id", &self.shared.id)
            .field("stage", &self.stage())
            .finish()
    }
}

impl Shared {
    fn on_timer(self: &Arc<Self>, kind: TimerKind, token: u64) {
        let mut tx = Transition::begin(self);
        if tx.state.is_closed() {
            return;
        }
        match *tx.state.slot(kind) {
            Some(timer) if timer.token == token => {}
            // Cancelled or re-armed after this callback was already in flight.
            _ => return,
        }
        tx.state.slot(kind).take();
        tx.emit(EventDetails::TimerCleared { timer: kind });

        // Absolute always wins a simultaneous expiry.
        let absolute_due =
            tx.now.saturating_sub(tx.state.start_time) >= self.config.absolute_maximum_ms;

        match kind {
            TimerKind::Absolute => tx.terminate(TerminationReason::AbsoluteMaximumReached),
            _ if absolute_due => tx.terminate(TerminationReason::AbsoluteMaximumReached),
            TimerKind::Primary if tx.state.stage == TimeoutStage::Active => {
                tx.change_stage(TimeoutStage::Grace, "primary_timeout");
                if let Err(err) = tx.set_timer(TimerKind::Grace, self.config.grace_timeout_ms) {
                    tracing::error!(timeout_id = %self.id, error = %err, "Failed to arm grace timer");
                    tx.terminate(TerminationReason::Other("timer_failure".to_string()));
                }
            }
            TimerKind::Grace if tx.state.stage == TimeoutStage::Grace => {
                tx.terminate(TerminationReason::GracePeriodExpired);
            }
            _ => {}
        }
        tx.finish();
    }
}

/// One locked state mutation plus the events it produced.
struct Transition<'a> {
    shared: &'a Arc<Shared>,
    state: MutexGuard<'a, TimeoutState>,
    now: u64,
    events: Vec<TimeoutEvent>,
}

impl<'a> Transition<'a> {
    fn begin(shared: &'a Arc<Shared>) -> Self {
        let state = shared.state.lock();
        let now = shared.driver.now_ms();
        Self {
            shared,
            state,
            now,
            events: Vec::new(),
        }
    }

    fn emit(&mut self, details: EventDetails) {
        let event = TimeoutEvent::new(self.now, details);
        if self.shared.debug {
            tracing::debug!(
                timeout_id = %self.shared.id,
                event = %event.to_json(),
                "{}",
                event.kind().as_str()
            );
        }
        self.events.push(event);
    }

    fn apply_output(&mut self, data: &str) -> Result<(), TimerError> {
        let config = Arc::clone(&self.shared.config);
        let action = self.shared.matcher.classify(data);
        let first_chunk = self.state.chunks_received == 0;
        self.state.chunks_received += 1;
        self.state.last_activity = self.now;

        let stage = self.state.stage;
        self.emit(EventDetails::Activity {
            bytes: data.len(),
            action: action.kind,
            stage,
        });

        if let Some(pattern) = action.pattern {
            match action.kind {
                PatternActionKind::Terminate => self.state.stats.error_matches += 1,
                PatternActionKind::Reset => self.state.stats.progress_matches += 1,
                _ => {}
            }
            self.emit(EventDetails::PatternMatch {
                action: action.kind,
                pattern,
            });
        }

        if action.kind == PatternActionKind::Terminate {
            self.terminate(TerminationReason::ErrorDetected);
            return Ok(());
        }

        match stage {
            TimeoutStage::Grace => {
                self.set_timer(TimerKind::Primary, config.base_timeout_ms)?;
                self.clear_timer(TimerKind::Grace);
                self.change_stage(TimeoutStage::Active, "activity_recovery");
                self.state.stats.grace_recoveries += 1;
                self.state.stats.full_resets += 1;
            }
            TimeoutStage::Active if action.kind == PatternActionKind::Reset => {
                self.set_timer(TimerKind::Primary, config.base_timeout_ms)?;
                self.state.stats.full_resets += 1;
            }
            // The first chunk must not shorten the initial base window.
            TimeoutStage::Active if !first_chunk => {
                self.set_timer(TimerKind::Primary, config.activity_extension_ms)?;
                self.state.stats.activity_extensions += 1;
            }
            _ => {}
        }
        Ok(())
    }

    /// Arm `kind`, replacing any timer already in that slot.
    ///
    /// The new timer is scheduled before the old one is cancelled, so a
    /// scheduling failure leaves the previous timer in place.
    fn set_timer(&mut self, kind: TimerKind, delay_ms: u64) -> Result<(), TimerError> {
        self.state.next_token += 1;
        let token = self.state.next_token;
        let weak: Weak<Shared> = Arc::downgrade(self.shared);
        let id = self.shared.driver.schedule(
            delay_ms,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.on_timer(kind, token);
                }
            }),
        )?;

        self.clear_timer(kind);
        *self.state.slot(kind) = Some(ArmedTimer { id, token });
        self.emit(EventDetails::TimerSet {
            timer: kind,
            duration_ms: delay_ms,
        });
        Ok(())
    }

    fn clear_timer(&mut self, kind: TimerKind) {
        if let Some(timer) = self.state.slot(kind).take() {
            self.shared.driver.cancel(timer.id);
            self.emit(EventDetails::TimerCleared { timer: kind });
        }
    }

    fn cancel_all_silently(&mut self) {
        for kind in [TimerKind::Primary, TimerKind::Grace, TimerKind::Absolute] {
            if let Some(timer) = self.state.slot(kind).take() {
                self.shared.driver.cancel(timer.id);
            }
        }
    }

    fn change_stage(&mut self, to: TimeoutStage, trigger: &'static str) {
        let from = self.state.stage;
        if from == to {
            return;
        }
        self.state.stage = to;
        self.emit(EventDetails::StateChange { from, to, trigger });
    }

    fn terminate(&mut self, reason: TerminationReason) {
        if self.state.terminated {
            return;
        }
        let stage = self.state.stage;
        let elapsed_ms = self.now.saturating_sub(self.state.start_time);

        self.state.terminated = true;
        self.state.termination_reason = Some(reason.clone());
        for kind in [TimerKind::Primary, TimerKind::Grace, TimerKind::Absolute] {
            self.clear_timer(kind);
        }
        self.change_stage(TimeoutStage::Expired, "termination");
        self.state.stats.record_termination(&reason);

        tracing::info!(
            timeout_id = %self.shared.id,
            reason = %reason,
            stage = stage.as_str(),
            elapsed_ms,
            "Timeout terminated"
        );
        self.emit(EventDetails::Termination {
            reason,
            stage,
            elapsed_ms,
        });
    }

    /// Release the lock, then deliver buffered events.
    fn finish(self) {
        let Transition {
            shared,
            state,
            events,
            ..
        } = self;
        let closed = state.is_closed();
        drop(state);

        let listeners = if closed {
            std::mem::take(&mut *shared.listeners.lock())
        } else {
            shared.listeners.lock().clone()
        };
        for event in &events {
            for listener in &listeners {
                listener(event);
            }
        }
    }
}
