//! Pluggable clock and timer primitives.
//!
//! The state machine never touches a system timer directly. It is handed a
//! [`TimerDriver`] so production code can run on tokio while tests drive a
//! [`ManualClock`] forward without real delays.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Identifier of a scheduled timer, unique per driver.
pub type TimerId = u64;

/// Work run when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Failure of the host timer primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("No tokio runtime available for timers")]
    NoRuntime,

    #[error("Timer driver rejected schedule request: {0}")]
    Rejected(String),
}

/// Clock plus one-shot timers.
pub trait TimerDriver: Send + Sync + 'static {
    /// Current time in milliseconds.
    fn now_ms(&self) -> u64;

    /// Run `callback` once after `delay_ms`.
    fn schedule(&self, delay_ms: u64, callback: TimerCallback) -> Result<TimerId, TimerError>;

    /// Cancel a pending timer. Unknown or already-fired ids are ignored.
    fn cancel(&self, id: TimerId);
}

/// Timers backed by tokio tasks.
///
/// Time is read from `tokio::time::Instant`, so a paused test runtime
/// (`start_paused = true`) moves this clock as well.
pub struct TokioTimerDriver {
    handle: Handle,
    epoch_ms: u64,
    epoch: tokio::time::Instant,
    next_id: AtomicU64,
    pending: std::sync::Arc<Mutex<HashMap<TimerId, AbortHandle>>>,
}

impl TokioTimerDriver {
    /// Bind to the runtime of the calling context.
    pub fn current() -> Result<Self, TimerError> {
        let handle = Handle::try_current().map_err(|_| TimerError::NoRuntime)?;
        Ok(Self::with_handle(handle))
    }

    pub fn with_handle(handle: Handle) -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            handle,
            epoch_ms,
            epoch: tokio::time::Instant::now(),
            next_id: AtomicU64::new(1),
            pending: std::sync::Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of timers that have not fired or been cancelled.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl TimerDriver for TokioTimerDriver {
    fn now_ms(&self) -> u64 {
        self.epoch_ms + self.epoch.elapsed().as_millis() as u64
    }

    fn schedule(&self, delay_ms: u64, callback: TimerCallback) -> Result<TimerId, TimerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = std::sync::Arc::clone(&self.pending);

        // Hold the map lock across spawn so the task cannot remove its own
        // entry before it has been inserted.
        let mut guard = self.pending.lock();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if pending.lock().remove(&id).is_some() {
                callback();
            }
        });
        guard.insert(id, task.abort_handle());
        Ok(id)
    }

    fn cancel(&self, id: TimerId) {
        if let Some(task) = self.pending.lock().remove(&id) {
            task.abort();
        }
    }
}

impl Drop for TokioTimerDriver {
    fn drop(&mut self) {
        for (_, task) in self.pending.lock().drain() {
            task.abort();
        }
    }
}

/// Deterministic clock for tests and simulations.
///
/// Time only moves when [`advance`](ManualClock::advance) is called. Timers
/// due at the same instant fire in scheduling order.
#[derive(Default)]
pub struct ManualClock {
    inner: Mutex<ManualInner>,
}

#[derive(Default)]
struct ManualInner {
    now: u64,
    next_id: TimerId,
    queue: BTreeMap<(u64, TimerId), TimerCallback>,
    deadlines: HashMap<TimerId, u64>,
    reject_schedules: bool,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock at `now` milliseconds.
    pub fn starting_at(now: u64) -> Self {
        let clock = Self::default();
        clock.inner.lock().now = now;
        clock
    }

    /// Move time forward, firing every timer that falls due on the way.
    ///
    /// Callbacks run without the clock lock held, so they may schedule or
    /// cancel timers themselves.
    pub fn advance(&self, ms: u64) {
        let target = self.inner.lock().now.saturating_add(ms);
        loop {
            let callback = {
                let mut inner = self.inner.lock();
                let due = inner
                    .queue
                    .keys()
                    .next()
                    .copied()
                    .filter(|(deadline, _)| *deadline <= target);
                match due {
                    Some(key) => {
                        inner.now = key.0;
                        inner.deadlines.remove(&key.1);
                        inner.queue.remove(&key)
                    }
                    None => {
                        inner.now = target;
                        None
                    }
                }
            };
            match callback {
                Some(callback) => callback(),
                None => break,
            }
        }
    }

    /// Advance to an absolute point in time.
    pub fn advance_to(&self, at: u64) {
        let now = self.now_ms();
        self.advance(at.saturating_sub(now));
    }

    /// Number of timers still waiting to fire.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<u64> {
        self.inner.lock().queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Make subsequent `schedule` calls fail, simulating resource exhaustion.
    pub fn reject_schedules(&self, reject: bool) {
        self.inner.lock().reject_schedules = reject;
    }
}

impl TimerDriver for ManualClock {
    fn now_ms(&self) -> u64 {
        self.inner.lock().now
    }

    fn schedule(&self, delay_ms: u64, callback: TimerCallback) -> Result<TimerId, TimerError> {
        let mut inner = self.inner.lock();
        if inner.reject_schedules {
            return Err(TimerError::Rejected("manual clock is rejecting timers".into()));
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let deadline = inner.now.saturating_add(delay_ms);
        inner.queue.insert((deadline, id), callback);
        inner.deadlines.insert(id, deadline);
        Ok(id)
    }

    fn cancel(&self, id: TimerId) {
        let mut inner = self.inner.lock();
        if let Some(deadline) = inner.deadlines.remove(&id) {
            inner.queue.remove(&(deadline, id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> TimerCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |label: &'static str| -> TimerCallback {
            let log = Arc::clone(&log_clone);
            Box::new(move || log.lock().push(label))
        };
        (log, make)
    }

    #[test]
    fn manual_clock_fires_in_deadline_order() {
        let clock = ManualClock::new();
        let (log, make) = recorder();

        clock.schedule(300, make("c")).unwrap();
        clock.schedule(100, make("a")).unwrap();
        clock.schedule(200, make("b")).unwrap();

        clock.advance(150);
        assert_eq!(*log.lock(), vec!["a"]);
        assert_eq!(clock.now_ms(), 150);

        clock.advance(1000);
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(clock.now_ms(), 1150);
    }

    #[test]
    fn manual_clock_cancel() {
        let clock = ManualClock::new();
        let (log, make) = recorder();

        let id = clock.schedule(100, make("a")).unwrap();
        clock.cancel(id);
        clock.cancel(id);
        clock.advance(200);

        assert!(log.lock().is_empty());
        assert_eq!(clock.pending_count(), 0);
    }

    #[test]
    fn manual_clock_callback_sees_its_deadline() {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let seen = Arc::new(Mutex::new(None));

        let (c, s) = (Arc::clone(&clock), Arc::clone(&seen));
        clock
            .schedule(250, Box::new(move || *s.lock() = Some(c.now_ms())))
            .unwrap();
        clock.advance(1_000);

        assert_eq!(*seen.lock(), Some(1_250));
    }

    #[test]
    fn manual_clock_rejects_when_asked() {
        let clock = ManualClock::new();
        clock.reject_schedules(true);
        assert!(matches!(
            clock.schedule(1, Box::new(|| {})),
            Err(TimerError::Rejected(_))
        ));
    }

    #[test]
    fn tokio_driver_requires_runtime() {
        assert!(matches!(
            TokioTimerDriver::current(),
            Err(TimerError::NoRuntime)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_driver_fires_and_cancels() {
        let driver = TokioTimerDriver::current().unwrap();
        let (log, make) = recorder();

        driver.schedule(100, make("fired")).unwrap();
        let cancelled = driver.schedule(100, make("cancelled")).unwrap();
        driver.cancel(cancelled);
        let start = driver.now_ms();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(*log.lock(), vec!["fired"]);
        assert_eq!(driver.pending_count(), 0);
        assert!(driver.now_ms() - start >= 150);
    }
}
