use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the task queue for `/health`.
///
/// `tasks_processed` counts successful executions, `tasks_failed` counts
/// tasks that errored, panicked, had no handler, or were rejected by an open
/// circuit breaker. Their sum is the number of tasks drained so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub tasks_queued: u64,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub queue_size: usize,
    pub registered_handlers: usize,
    pub last_process_time: Option<DateTime<Utc>>,
    /// How long the drain currently running has been going, if any.
    pub drain_in_progress_ms: Option<u64>,
}
