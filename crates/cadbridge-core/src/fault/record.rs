//! Error history records and aggregate statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

use super::{BreakerSnapshot, ErrorCategory, ErrorSeverity};

/// One handled error. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub module: String,
    pub function: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Server-side only; never copied into a client response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStatistics {
    pub total_errors: u64,
    pub recent_errors: usize,
    pub by_category: BTreeMap<String, u64>,
    pub by_module: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    pub open_circuit_breakers: usize,
    pub circuit_breakers: Vec<BreakerSnapshot>,
}

/// Bounded history (oldest evicted first) plus cumulative counters.
///
/// Counters are not bounded by the history capacity: they keep counting
/// until `clear`.
pub(crate) struct ErrorHistory {
    records: VecDeque<ErrorRecord>,
    capacity: usize,
    total: u64,
    by_category: BTreeMap<String, u64>,
    by_module: BTreeMap<String, u64>,
    by_severity: BTreeMap<String, u64>,
}

impl ErrorHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            total: 0,
            by_category: BTreeMap::new(),
            by_module: BTreeMap::new(),
            by_severity: BTreeMap::new(),
        }
    }

    pub(crate) fn push(&mut self, record: ErrorRecord) {
        self.total += 1;
        *self
            .by_category
            .entry(record.category.as_str().to_string())
            .or_default() += 1;
        *self.by_module.entry(record.module.clone()).or_default() += 1;
        *self
            .by_severity
            .entry(record.severity.as_str().to_string())
            .or_default() += 1;

        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub(crate) fn records(&self) -> impl DoubleEndedIterator<Item = &ErrorRecord> {
        self.records.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn statistics(&self, recent_since: DateTime<Utc>) -> ErrorStatistics {
        ErrorStatistics {
            total_errors: self.total,
            recent_errors: self
                .records
                .iter()
                .filter(|r| r.timestamp >= recent_since)
                .count(),
            by_category: self.by_category.clone(),
            by_module: self.by_module.clone(),
            by_severity: self.by_severity.clone(),
            open_circuit_breakers: 0,
            circuit_breakers: Vec::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.total = 0;
        self.by_category.clear();
        self.by_module.clear();
        self.by_severity.clear();
    }
}
