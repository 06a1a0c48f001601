//! Timeout configuration and validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for one resilient timeout.
///
/// All durations are in milliseconds. The value is immutable once handed to
/// a [`ResilientTimeout`](super::ResilientTimeout) and may be shared
/// read-only between many instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Primary window without output before the command is considered stalled.
    pub base_timeout_ms: u64,
    /// Top-up granted by ordinary (non-progress) output.
    pub activity_extension_ms: u64,
    /// Final window after the primary timer fires.
    pub grace_timeout_ms: u64,
    /// Hard ceiling on total wall-clock time.
    pub absolute_maximum_ms: u64,
    /// Patterns signalling genuine forward progress.
    #[serde(default)]
    pub progress_patterns: Vec<String>,
    /// Patterns signalling failure.
    #[serde(default)]
    pub error_patterns: Vec<String>,
    /// Log every event to the diagnostic stream.
    #[serde(default)]
    pub debug: bool,
}

/// Invalid timeout configuration.
///
/// Lists every violated constraint, not just the first one found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid timeout configuration: {}", .violations.join("; "))]
pub struct TimeoutConfigError {
    pub violations: Vec<String>,
}

impl TimeoutConfig {
    /// Check hard constraints.
    ///
    /// Timeout fields must be positive and every pattern must be a non-empty,
    /// valid regular expression.
    pub fn validate(&self) -> Result<(), TimeoutConfigError> {
        let mut violations = Vec::new();

        for (name, value) in self.durations() {
            if value == 0 {
                violations.push(format!("{} must be a positive integer (got 0)", name));
            }
        }

        check_patterns("progress_patterns", &self.progress_patterns, &mut violations);
        check_patterns("error_patterns", &self.error_patterns, &mut violations);

        if violations.is_empty() {
            Ok(())
        } else {
            Err(TimeoutConfigError { violations })
        }
    }

    /// Relationship checks that are suspicious but not fatal.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let floor = self.base_timeout_ms.saturating_add(self.grace_timeout_ms);
        if self.absolute_maximum_ms <= floor {
            warnings.push(format!(
                "absolute_maximum_ms ({}) should exceed base_timeout_ms + grace_timeout_ms ({})",
                self.absolute_maximum_ms, floor
            ));
        }
        if self.grace_timeout_ms >= self.base_timeout_ms {
            warnings.push(format!(
                "grace_timeout_ms ({}) should be shorter than base_timeout_ms ({})",
                self.grace_timeout_ms, self.base_timeout_ms
            ));
        }
        warnings
    }

    fn durations(&self) -> [(&'static str, u64); 4] {
        [
            ("base_timeout_ms", self.base_timeout_ms),
            ("activity_extension_ms", self.activity_extension_ms),
            ("grace_timeout_ms", self.grace_timeout_ms),
            ("absolute_maximum_ms", self.absolute_maximum_ms),
        ]
    }
}

fn check_patterns(field: &str, patterns: &[String], violations: &mut Vec<String>) {
    for (index, pattern) in patterns.iter().enumerate() {
        if pattern.is_empty() {
            violations.push(format!("{}[{}] must not be empty", field, index));
            continue;
        }
        if let Err(err) = regex::Regex::new(pattern) {
            violations.push(format!(
                "{}[{}] is not a valid regular expression: {}",
                field,
                index,
                summary_line(&err.to_string())
            ));
        }
    }
}

fn summary_line(message: &str) -> &str {
    message.lines().last().unwrap_or(message).trim()
}
