//! Per-instance counters.

use std::collections::HashMap;

use super::event::TerminationReason;

/// Cumulative statistics for one [`ResilientTimeout`](super::ResilientTimeout).
///
/// Counters only grow; a fresh instance starts from zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeoutStats {
    /// Instances cleaned up without being terminated.
    pub completions: u64,
    /// GRACE → ACTIVE transitions caused by renewed output.
    pub grace_recoveries: u64,
    pub terminations: HashMap<TerminationReason, u64>,
    pub progress_matches: u64,
    pub error_matches: u64,
    /// Primary re-armed at the activity extension.
    pub activity_extensions: u64,
    /// Primary re-armed at the full base timeout (progress or recovery).
    pub full_resets: u64,
    pub chunks_processed: u64,
    /// Running mean of `process_output` cost, in milliseconds.
    pub avg_processing_ms: f64,
}

impl TimeoutStats {
    /// Terminations recorded for `reason`.
    pub fn terminations_for(&self, reason: &TerminationReason) -> u64 {
        self.terminations.get(reason).copied().unwrap_or(0)
    }

    pub fn total_terminations(&self) -> u64 {
        self.terminations.values().sum()
    }

    pub(crate) fn record_termination(&mut self, reason: &TerminationReason) {
        *self.terminations.entry(reason.clone()).or_insert(0) += 1;
    }

    pub(crate) fn record_processing(&mut self, elapsed_ms: f64) {
        self.chunks_processed += 1;
        let n = self.chunks_processed as f64;
        self.avg_processing_ms += (elapsed_ms - self.avg_processing_ms) / n;
    }
}
