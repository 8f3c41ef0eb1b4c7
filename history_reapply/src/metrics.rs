//! Reapplication metrics.
//!
//! Recorded through the `metrics` crate facade; the embedding process
//! installs whichever recorder it exports to.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `history_reapply_calls_total` | Counter | `result` |
//! | `history_reapply_events_total` | Counter | - |
//! | `history_reapply_duplicates_total` | Counter | - |
//! | `history_reapply_tasks_scheduled_total` | Counter | - |

use metrics::counter;

pub mod names {
    /// Counter: reapply calls by outcome.
    pub const CALLS_TOTAL: &str = "history_reapply_calls_total";
    /// Counter: signal events appended by reapplication.
    pub const EVENTS_TOTAL: &str = "history_reapply_events_total";
    /// Counter: signal events skipped because their key was already recorded.
    pub const DUPLICATES_TOTAL: &str = "history_reapply_duplicates_total";
    /// Counter: tasks scheduled as a consequence of reapplication.
    pub const TASKS_SCHEDULED_TOTAL: &str = "history_reapply_tasks_scheduled_total";
}

pub mod labels {
    /// Call outcome (applied, noop, closed, malformed, cancelled, failed).
    pub const RESULT: &str = "result";
}

/// Outcome label values.
pub mod results {
    pub const APPLIED: &str = "applied";
    pub const NOOP: &str = "noop";
    pub const CLOSED: &str = "closed";
    pub const MALFORMED: &str = "malformed";
    pub const CANCELLED: &str = "cancelled";
    pub const FAILED: &str = "failed";
}

#[derive(Debug, Clone)]
pub struct ReapplyMetrics {
    enabled: bool,
}

impl Default for ReapplyMetrics {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl ReapplyMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder that drops everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_call(&self, result: &'static str) {
        if self.enabled {
            counter!(names::CALLS_TOTAL, labels::RESULT => result).increment(1);
        }
    }

    pub fn record_reapplied(&self, count: usize) {
        if self.enabled && count > 0 {
            counter!(names::EVENTS_TOTAL).increment(count as u64);
        }
    }

    pub fn record_duplicates(&self, count: usize) {
        if self.enabled && count > 0 {
            counter!(names::DUPLICATES_TOTAL).increment(count as u64);
        }
    }

    pub fn record_task_scheduled(&self) {
        if self.enabled {
            counter!(names::TASKS_SCHEDULED_TOTAL).increment(1);
        }
    }
}
