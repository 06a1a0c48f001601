//! Resilient command timeouts.
//!
//! A [`ResilientTimeout`] watches the output of one shell command and decides
//! whether the command is still working, hung, or failing:
//!
//! - progress patterns restore the full base window,
//! - ordinary output buys a shorter extension,
//! - silence moves the timeout into a grace stage, and more silence expires it,
//! - error patterns and the absolute ceiling end it immediately.

mod config;
mod driver;
mod error;
mod event;
mod patterns;
mod resilient;
mod stats;

pub use config::{TimeoutConfig, TimeoutConfigError};
pub use driver::{ManualClock, TimerCallback, TimerDriver, TimerError, TimerId, TokioTimerDriver};
pub use error::TimeoutError;
pub use event::{
    EventDetails, TerminationReason, TimeoutEvent, TimeoutEventKind, TimeoutStage, TimerKind,
};
pub use patterns::{
    clear_pattern_cache, pattern_cache_len, PatternAction, PatternActionKind, PatternMatcher,
};
pub use resilient::{EventListener, ResilientTimeout, TimeoutSnapshot};
pub use stats::TimeoutStats;
