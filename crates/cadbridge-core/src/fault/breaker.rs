//! Per-(module, function, category) circuit breakers.
//!
//! State machine per key:
//! - Closed -> Open on the `threshold`-th failure inside the window
//! - Open -> Closed when consulted after `window` without a new failure
//!
//! A success never closes a breaker; only window expiry does. There is no
//! half-open probing state.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use super::ErrorCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BreakerKey {
    pub module: String,
    pub function: String,
    pub category: ErrorCategory,
}

impl BreakerKey {
    pub fn new(module: &str, function: &str, category: ErrorCategory) -> Self {
        Self {
            module: module.to_string(),
            function: function.to_string(),
            category,
        }
    }
}

impl fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.module, self.function, self.category)
    }
}

#[derive(Debug, Clone)]
struct BreakerEntry {
    failure_count: u32,
    last_failure_at: DateTime<Utc>,
    state: BreakerState,
}

/// Read-only view for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub key: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub last_failure_at: DateTime<Utc>,
}

pub struct CircuitBreakerTable {
    entries: Mutex<HashMap<BreakerKey, BreakerEntry>>,
    threshold: u32,
    window: TimeDelta,
}

impl CircuitBreakerTable {
    pub fn new(threshold: u32, window: TimeDelta) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            threshold,
            window,
        }
    }

    /// Count one failure for `key` and return the resulting state.
    ///
    /// A failure arriving more than `window` after the previous one opens a
    /// fresh window (count restarts at 1).
    pub fn record_failure(&self, key: &BreakerKey, now: DateTime<Utc>) -> BreakerState {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.clone()).or_insert(BreakerEntry {
            failure_count: 0,
            last_failure_at: now,
            state: BreakerState::Closed,
        });

        if now - entry.last_failure_at > self.window {
            entry.failure_count = 1;
            entry.state = BreakerState::Closed;
        } else {
            entry.failure_count += 1;
        }
        entry.last_failure_at = now;

        if entry.failure_count >= self.threshold {
            entry.state = BreakerState::Open;
        }
        entry.state
    }

    /// Current state of `key`, resetting it first if it has been idle for at
    /// least `window`. Unknown keys are closed.
    pub fn consult(&self, key: &BreakerKey, now: DateTime<Utc>) -> BreakerState {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return BreakerState::Closed;
        };

        if now - entry.last_failure_at >= self.window && entry.failure_count > 0 {
            tracing::info!(breaker = %key, "circuit breaker reset after idle window");
            entry.failure_count = 0;
            entry.state = BreakerState::Closed;
        }
        entry.state
    }

    /// State as `consult` would report it at `now`, without mutating the entry.
    fn effective(&self, entry: &BreakerEntry, now: DateTime<Utc>) -> (BreakerState, u32) {
        if now - entry.last_failure_at >= self.window {
            (BreakerState::Closed, 0)
        } else {
            (entry.state, entry.failure_count)
        }
    }

    /// Every known breaker as of `now`. Idle entries read as closed.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<BreakerSnapshot> {
        let entries = self.entries.lock();
        let mut out: Vec<BreakerSnapshot> = entries
            .iter()
            .map(|(key, entry)| {
                let (state, failure_count) = self.effective(entry, now);
                BreakerSnapshot {
                    key: key.to_string(),
                    state,
                    failure_count,
                    last_failure_at: entry.last_failure_at,
                }
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    pub fn open_count(&self, now: DateTime<Utc>) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| self.effective(e, now).0 == BreakerState::Open)
            .count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn key() -> BreakerKey {
        BreakerKey::new("cam", "generate_toolpaths", ErrorCategory::TaskExecution)
    }

    fn table() -> CircuitBreakerTable {
        CircuitBreakerTable::new(5, TimeDelta::seconds(300))
    }

    #[test]
    fn opens_on_fifth_failure() {
        let table = table();
        for i in 0..4 {
            let state = table.record_failure(&key(), t0() + TimeDelta::seconds(i));
            assert_eq!(state, BreakerState::Closed);
        }
        assert_eq!(
            table.record_failure(&key(), t0() + TimeDelta::seconds(4)),
            BreakerState::Open
        );
        assert_eq!(table.consult(&key(), t0() + TimeDelta::seconds(10)), BreakerState::Open);
        assert_eq!(table.open_count(t0() + TimeDelta::seconds(10)), 1);
    }

    #[test]
    fn idle_window_resets_on_consult() {
        let table = table();
        for _ in 0..5 {
            table.record_failure(&key(), t0());
        }
        let later = t0() + TimeDelta::seconds(300);
        assert_eq!(table.consult(&key(), later), BreakerState::Closed);

        let snap = table.snapshot(later);
        assert_eq!(snap[0].failure_count, 0);
        assert_eq!(snap[0].state, BreakerState::Closed);
    }

    #[test]
    fn idle_breaker_reads_closed_without_consult() {
        let table = table();
        for _ in 0..5 {
            table.record_failure(&key(), t0());
        }
        assert_eq!(table.open_count(t0() + TimeDelta::seconds(299)), 1);

        let much_later = t0() + TimeDelta::hours(24);
        assert_eq!(table.open_count(much_later), 0);
        let snap = table.snapshot(much_later);
        assert_eq!(snap[0].state, BreakerState::Closed);
        assert_eq!(snap[0].failure_count, 0);
    }

    #[test]
    fn stale_failures_start_a_fresh_window() {
        let table = table();
        for _ in 0..4 {
            table.record_failure(&key(), t0());
        }
        // More than 300s later: this failure counts as the first of a new window.
        let state = table.record_failure(&key(), t0() + TimeDelta::seconds(301));
        assert_eq!(state, BreakerState::Closed);
        assert_eq!(table.snapshot(t0() + TimeDelta::seconds(301))[0].failure_count, 1);
    }

    #[test]
    fn keys_are_independent() {
        let table = table();
        for _ in 0..5 {
            table.record_failure(&key(), t0());
        }
        let other = BreakerKey::new("cam", "generate_toolpaths", ErrorCategory::HostApi);
        assert_eq!(table.consult(&other, t0()), BreakerState::Closed);
        assert_eq!(key().to_string(), "cam.generate_toolpaths.TASK_EXECUTION");
    }

    #[test]
    fn clear_drops_everything() {
        let table = table();
        for _ in 0..5 {
            table.record_failure(&key(), t0());
        }
        table.clear();
        assert_eq!(table.consult(&key(), t0()), BreakerState::Closed);
        assert!(table.snapshot(t0()).is_empty());
    }
}
