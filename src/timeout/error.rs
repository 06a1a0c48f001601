use thiserror::Error;

use super::config::TimeoutConfigError;
use super::driver::TimerError;

/// Errors surfaced synchronously by a timeout.
///
/// Terminations are not errors; they arrive as events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutError {
    #[error(transparent)]
    Config(#[from] TimeoutConfigError),

    #[error("Timer failure: {0}")]
    Timer(#[from] TimerError),
}
