//! Stages, termination reasons, and diagnostic events.

use serde::Serialize;
use serde_json::{json, Value};

use super::patterns::PatternActionKind;

/// Lifecycle phase of a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeoutStage {
    /// Countdown running, command presumed healthy.
    Active,
    /// Primary window elapsed; short final countdown running.
    Grace,
    /// Terminal. No timers run.
    Expired,
}

impl TimeoutStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutStage::Active => "ACTIVE",
            TimeoutStage::Grace => "GRACE",
            TimeoutStage::Expired => "EXPIRED",
        }
    }
}

/// Why a timeout ended.
///
/// Callers should keep a fallback arm: new reasons may be added.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TerminationReason {
    ErrorDetected,
    GracePeriodExpired,
    AbsoluteMaximumReached,
    ManualTermination,
    ExternalTermination,
    /// Caller-supplied or internal reason outside the standard set.
    Other(String),
}

impl TerminationReason {
    pub fn as_str(&self) -> &str {
        match self {
            TerminationReason::ErrorDetected => "error_detected",
            TerminationReason::GracePeriodExpired => "grace_period_expired",
            TerminationReason::AbsoluteMaximumReached => "absolute_maximum_reached",
            TerminationReason::ManualTermination => "manual_termination",
            TerminationReason::ExternalTermination => "external_termination",
            TerminationReason::Other(reason) => reason,
        }
    }

    /// Parse a reason string; unknown values become [`TerminationReason::Other`].
    pub fn parse(value: &str) -> Self {
        match value {
            "error_detected" => TerminationReason::ErrorDetected,
            "grace_period_expired" => TerminationReason::GracePeriodExpired,
            "absolute_maximum_reached" => TerminationReason::AbsoluteMaximumReached,
            "manual_termination" => TerminationReason::ManualTermination,
            "external_termination" => TerminationReason::ExternalTermination,
            other => TerminationReason::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TerminationReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Which of the three timers an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Primary,
    Grace,
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutEventKind {
    StateChange,
    TimerSet,
    TimerCleared,
    PatternMatch,
    Termination,
    Activity,
}

impl TimeoutEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutEventKind::StateChange => "state_change",
            TimeoutEventKind::TimerSet => "timer_set",
            TimeoutEventKind::TimerCleared => "timer_cleared",
            TimeoutEventKind::PatternMatch => "pattern_match",
            TimeoutEventKind::Termination => "termination",
            TimeoutEventKind::Activity => "activity",
        }
    }
}

/// Payload of a [`TimeoutEvent`]; the variant determines the event type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventDetails {
    StateChange {
        from: TimeoutStage,
        to: TimeoutStage,
        trigger: &'static str,
    },
    TimerSet {
        timer: TimerKind,
        duration_ms: u64,
    },
    TimerCleared {
        timer: TimerKind,
    },
    PatternMatch {
        action: PatternActionKind,
        pattern: String,
    },
    Termination {
        reason: TerminationReason,
        stage: TimeoutStage,
        elapsed_ms: u64,
    },
    Activity {
        bytes: usize,
        action: PatternActionKind,
        stage: TimeoutStage,
    },
}

/// Immutable record of one observable transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutEvent {
    pub timestamp: u64,
    pub details: EventDetails,
}

impl TimeoutEvent {
    pub fn new(timestamp: u64, details: EventDetails) -> Self {
        Self { timestamp, details }
    }

    pub fn kind(&self) -> TimeoutEventKind {
        match self.details {
            EventDetails::StateChange { .. } => TimeoutEventKind::StateChange,
            EventDetails::TimerSet { .. } => TimeoutEventKind::TimerSet,
            EventDetails::TimerCleared { .. } => TimeoutEventKind::TimerCleared,
            EventDetails::PatternMatch { .. } => TimeoutEventKind::PatternMatch,
            EventDetails::Termination { .. } => TimeoutEventKind::Termination,
            EventDetails::Activity { .. } => TimeoutEventKind::Activity,
        }
    }

    /// Termination reason, if this is a termination event.
    pub fn termination_reason(&self) -> Option<&TerminationReason> {
        match &self.details {
            EventDetails::Termination { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// `{type, timestamp, details}` JSON rendering used by the debug channel.
    pub fn to_json(&self) -> Value {
        json!({
            "type": self.kind().as_str(),
            "timestamp": self.timestamp,
            "details": serde_json::to_value(&self.details).unwrap_or(Value::Null),
        })
    }
}
