//! Stateful start/process/stop surface over one resilient timeout at a time.

use std::sync::Arc;

use parking_lot::Mutex;

use super::profiles::{ProfileRegistry, ToolKind};
use crate::timeout::{
    ResilientTimeout, TerminationReason, TimeoutError, TimeoutSnapshot, TimeoutStats,
    TimerDriver, TimerError,
};

/// Called once when the owned timeout terminates.
pub type TimeoutCallback = Box<dyn FnOnce(TerminationReason) + Send>;

type CallbackSlot = Arc<Mutex<Option<TimeoutCallback>>>;

/// Snapshot of the command currently being watched.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellTimeoutState {
    pub command: String,
    pub tool: ToolKind,
    pub timeout: TimeoutSnapshot,
}

struct Running {
    command: String,
    tool: ToolKind,
    timeout: Arc<ResilientTimeout>,
    callback: CallbackSlot,
}

/// Command-executor facing timeout wrapper.
///
/// Owns at most one [`ResilientTimeout`]; starting a new command tears the
/// previous one down.
pub struct ShellTimeout {
    driver: Arc<dyn TimerDriver>,
    registry: Arc<ProfileRegistry>,
    running: Mutex<Option<Running>>,
}

impl ShellTimeout {
    pub fn new(driver: Arc<dyn TimerDriver>) -> Self {
        Self::with_registry(driver, Arc::new(ProfileRegistry::builtin()))
    }

    pub fn with_registry(driver: Arc<dyn TimerDriver>, registry: Arc<ProfileRegistry>) -> Self {
        Self {
            driver,
            registry,
            running: Mutex::new(None),
        }
    }

    /// Start watching `command` with a `timeout_ms` base window.
    ///
    /// The profile is picked by classifying the command text. Its base
    /// timeout is replaced by `timeout_ms`, its extension and grace windows
    /// are capped at half of it, and its absolute maximum is raised to at
    /// least three times that value.
    pub fn start<F>(&self, command: &str, timeout_ms: u64, on_timeout: F) -> Result<(), TimeoutError>
    where
        F: FnOnce(TerminationReason) + Send + 'static,
    {
        self.stop();

        let tool = self.registry.resolve(command);
        let mut config = self.registry.config_for(tool);
        config.base_timeout_ms = timeout_ms;
        // Plain output must never earn more time than a progress match.
        let window_cap = (timeout_ms / 2).max(1);
        config.activity_extension_ms = config.activity_extension_ms.min(window_cap);
        config.grace_timeout_ms = config.grace_timeout_ms.min(window_cap);
        config.absolute_maximum_ms = config
            .absolute_maximum_ms
            .max(timeout_ms.saturating_mul(3));

        tracing::debug!(
            command = %command,
            tool = %tool,
            base_timeout_ms = config.base_timeout_ms,
            activity_extension_ms = config.activity_extension_ms,
            grace_timeout_ms = config.grace_timeout_ms,
            absolute_maximum_ms = config.absolute_maximum_ms,
            "Starting command timeout"
        );

        let timeout = Arc::new(ResilientTimeout::new(config, Arc::clone(&self.driver))?);
        let on_timeout: TimeoutCallback = Box::new(on_timeout);
        let callback: CallbackSlot = Arc::new(Mutex::new(Some(on_timeout)));

        let slot = Arc::clone(&callback);
        timeout.on_termination(move |reason| {
            // Take before calling so the callback may re-enter this wrapper.
            let callback = slot.lock().take();
            if let Some(callback) = callback {
                callback(reason.clone());
            }
        });

        *self.running.lock() = Some(Running {
            command: command.to_string(),
            tool,
            timeout,
            callback,
        });
        Ok(())
    }

    /// Forward output to the owned timeout; dropped when none is active.
    pub fn process_output(&self, data: &str) -> Result<(), TimerError> {
        match self.active_timeout() {
            Some(timeout) => timeout.process_output(data),
            None => Ok(()),
        }
    }

    /// Terminate the owned timeout with `reason`, firing the callback.
    pub fn terminate(&self, reason: TerminationReason) {
        if let Some(timeout) = self.active_timeout() {
            timeout.terminate_with(reason);
        }
    }

    /// Dispose the owned timeout and forget its callback. Idempotent.
    pub fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(running) = running {
            running.callback.lock().take();
            running.timeout.cleanup();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_timeout().is_some()
    }

    pub fn state(&self) -> Option<ShellTimeoutState> {
        let running = self.running.lock();
        running.as_ref().map(|running| ShellTimeoutState {
            command: running.command.clone(),
            tool: running.tool,
            timeout: running.timeout.snapshot(),
        })
    }

    pub fn stats(&self) -> Option<TimeoutStats> {
        self.running
            .lock()
            .as_ref()
            .map(|running| running.timeout.stats())
    }

    fn active_timeout(&self) -> Option<Arc<ResilientTimeout>> {
        self.running
            .lock()
            .as_ref()
            .filter(|running| running.timeout.is_active())
            .map(|running| Arc::clone(&running.timeout))
    }
}

impl Drop for ShellTimeout {
    fn drop(&mut self) {
        self.stop();
    }
}
