//! Process-wide error handler.
//!
//! Every failure the router or the task queue catches ends up here: it is
//! recorded in the bounded history, logged at a level derived from its
//! severity, counted against its circuit breaker, and turned into the
//! client-facing `ErrorResponse`.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::breaker::{BreakerKey, BreakerState, CircuitBreakerTable};
use super::record::{ErrorHistory, ErrorRecord, ErrorStatistics};
use super::taxonomy::{ErrorCategory, ErrorSeverity, recovery_suggestions};
use crate::config::ErrorsConfig;
use crate::domain::ErrorResponse;
use crate::ports::Clock;

pub const CIRCUIT_OPEN_CODE: &str = "CIRCUIT_BREAKER_OPEN";

/// Where an error happened and how bad it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSite {
    pub module: String,
    pub function: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
}

impl ErrorSite {
    /// Defaults to `Medium` severity.
    pub fn new(module: impl Into<String>, function: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            category,
            severity: ErrorSeverity::Medium,
        }
    }

    pub fn severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    fn breaker_key(&self) -> BreakerKey {
        BreakerKey::new(&self.module, &self.function, self.category)
    }
}

pub struct ErrorHandler {
    clock: Arc<dyn Clock>,
    history: Mutex<ErrorHistory>,
    breakers: CircuitBreakerTable,
    recent_window: TimeDelta,
}

impl ErrorHandler {
    pub fn new(config: &ErrorsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            history: Mutex::new(ErrorHistory::new(config.history_capacity)),
            breakers: CircuitBreakerTable::new(config.breaker_threshold, window(config.breaker_window_secs)),
            recent_window: window(config.recent_window_secs),
        }
    }

    /// Record, log and count `error`, then build the client response.
    ///
    /// Once the site's breaker is open the fixed "temporarily unavailable"
    /// response is returned instead of one describing this error.
    pub fn handle_error(
        &self,
        error: &(dyn StdError + 'static),
        site: &ErrorSite,
        context: Option<Value>,
    ) -> ErrorResponse {
        let now = self.record(error, site, context.clone());

        let key = site.breaker_key();
        if self.breakers.record_failure(&key, now) == BreakerState::Open {
            warn!(breaker = %key, "circuit breaker open");
            return Self::circuit_open_response();
        }

        Self::describe(error, site, context)
    }

    /// Record and log a registration-time failure.
    ///
    /// Nothing consults breakers for registration sites, so these never count
    /// against one.
    pub fn record_config_error(&self, error: &(dyn StdError + 'static), site: &ErrorSite, context: Option<Value>) {
        self.record(error, site, context);
    }

    fn record(&self, error: &(dyn StdError + 'static), site: &ErrorSite, context: Option<Value>) -> DateTime<Utc> {
        let now = self.clock.now();
        let message = error.to_string();

        let backtrace = Backtrace::capture();
        let stack_trace = (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string());

        log_at_severity(site, &message, stack_trace.as_deref());

        self.history.lock().push(ErrorRecord {
            module: site.module.clone(),
            function: site.function.clone(),
            category: site.category,
            severity: site.severity,
            timestamp: now,
            message,
            stack_trace,
            context,
        });
        now
    }

    /// Build the response for `error` without recording anything.
    pub fn describe(error: &dyn StdError, site: &ErrorSite, context: Option<Value>) -> ErrorResponse {
        let mut details = json!({
            "category": site.category,
            "severity": site.severity,
        });
        if let Some(context) = context {
            details["context"] = context;
        }

        ErrorResponse::new(site.category.http_status(), site.category.code(), error.to_string())
            .with_details(details)
            .with_suggestions(recovery_suggestions(site.category, &site.module))
            .with_module_context(site.module.clone())
    }

    /// Generic rejection used while a breaker is open. Deliberately says
    /// nothing about which operation tripped it.
    pub fn circuit_open_response() -> ErrorResponse {
        ErrorResponse::new(
            503,
            CIRCUIT_OPEN_CODE,
            "Service temporarily unavailable. Please try again later.",
        )
        .with_suggestions(vec![
            "Wait a few minutes before retrying this operation".to_string(),
            "Check GET /health for the bridge status".to_string(),
        ])
    }

    /// Consult the breaker for a site before doing work there.
    pub fn is_circuit_open(&self, module: &str, function: &str, category: ErrorCategory) -> bool {
        let key = BreakerKey::new(module, function, category);
        self.breakers.consult(&key, self.clock.now()) == BreakerState::Open
    }

    pub fn get_error_statistics(&self) -> ErrorStatistics {
        let now = self.clock.now();
        let since = now.checked_sub_signed(self.recent_window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut stats = self.history.lock().statistics(since);
        stats.circuit_breakers = self.breakers.snapshot(now);
        stats.open_circuit_breakers = self.breakers.open_count(now);
        stats
    }

    /// Newest first.
    pub fn recent_records(&self, limit: usize) -> Vec<ErrorRecord> {
        self.history.lock().records().rev().take(limit).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Admin reset: history, counters and every breaker.
    pub fn clear_error_history(&self) {
        self.history.lock().clear();
        self.breakers.clear();
        warn!("error history and circuit breakers cleared");
    }
}

/// Saturates instead of overflowing for windows `BridgeConfig::validate` would reject.
fn window(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

fn log_at_severity(site: &ErrorSite, message: &str, stack_trace: Option<&str>) {
    let module = site.module.as_str();
    let function = site.function.as_str();
    let category = site.category.as_str();
    match site.severity {
        ErrorSeverity::Low => debug!(module, function, category, "{message}"),
        ErrorSeverity::Medium => warn!(module, function, category, "{message}"),
        ErrorSeverity::High => error!(module, function, category, "{message}"),
        ErrorSeverity::Critical => error!(module, function, category, critical = true, "{message}"),
    }
    if let Some(trace) = stack_trace {
        debug!(module, function, "stack trace:\n{trace}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn handler() -> (ErrorHandler, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        (ErrorHandler::new(&ErrorsConfig::default(), clock.clone()), clock)
    }

    fn site() -> ErrorSite {
        ErrorSite::new("cam_ops", "generate", ErrorCategory::HostApi).severity(ErrorSeverity::High)
    }

    #[test]
    fn response_is_derived_from_the_category() {
        let (handler, _) = handler();
        let err = BridgeError::HostApi("no active document".to_string());

        let resp = handler.handle_error(&err, &site(), Some(json!({"tool_id": "t1"})));

        assert_eq!(resp.status, 500);
        assert_eq!(resp.code, "HOST_API_ERROR");
        assert_eq!(resp.module_context.as_deref(), Some("cam_ops"));
        assert!(resp.message.contains("no active document"));
        assert_eq!(resp.details.as_ref().unwrap()["context"]["tool_id"], "t1");
        assert!(resp.recovery_suggestions.iter().any(|s| s.contains("CAM setup")));
    }

    #[test]
    fn fifth_failure_short_circuits() {
        let (handler, _) = handler();
        let err = BridgeError::HostApi("boom".to_string());

        for _ in 0..4 {
            assert_eq!(handler.handle_error(&err, &site(), None).code, "HOST_API_ERROR");
        }
        let fifth = handler.handle_error(&err, &site(), None);
        assert_eq!(fifth.status, 503);
        assert_eq!(fifth.code, CIRCUIT_OPEN_CODE);
        assert!(fifth.module_context.is_none());
        assert!(handler.is_circuit_open("cam_ops", "generate", ErrorCategory::HostApi));
    }

    #[test]
    fn breaker_closes_after_idle_window() {
        let (handler, clock) = handler();
        let err = BridgeError::HostApi("boom".to_string());
        for _ in 0..5 {
            handler.handle_error(&err, &site(), None);
        }
        clock.advance(TimeDelta::seconds(299));
        assert!(handler.is_circuit_open("cam_ops", "generate", ErrorCategory::HostApi));

        clock.advance(TimeDelta::seconds(1));
        assert!(!handler.is_circuit_open("cam_ops", "generate", ErrorCategory::HostApi));
    }

    #[test]
    fn absurd_windows_saturate() {
        assert_eq!(window(300), TimeDelta::seconds(300));
        assert_eq!(window(u64::MAX), TimeDelta::MAX);
        let config = ErrorsConfig {
            breaker_window_secs: u64::MAX,
            recent_window_secs: u64::MAX,
            ..ErrorsConfig::default()
        };
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()));
        let handler = ErrorHandler::new(&config, clock);
        assert_eq!(handler.get_error_statistics().total_errors, 0);
    }

    #[test]
    fn config_errors_are_recorded_but_never_trip_a_breaker() {
        let (handler, _) = handler();
        let err = BridgeError::Config("pattern /bad/{ is unbalanced".to_string());
        let config_site = ErrorSite::new("cam_ops", "register_handler", ErrorCategory::Configuration);

        for _ in 0..10 {
            handler.record_config_error(&err, &config_site, None);
        }

        let stats = handler.get_error_statistics();
        assert_eq!(stats.by_category["CONFIGURATION"], 10);
        assert_eq!(stats.open_circuit_breakers, 0);
        assert!(stats.circuit_breakers.is_empty());
    }

    #[test]
    fn idle_breakers_drop_out_of_statistics() {
        let (handler, clock) = handler();
        let err = BridgeError::Task("extrude failed".to_string());
        let task_site = ErrorSite::new("task_queue", "extrude", ErrorCategory::TaskExecution);
        for _ in 0..5 {
            handler.handle_error(&err, &task_site, None);
        }
        assert_eq!(handler.get_error_statistics().open_circuit_breakers, 1);

        clock.advance(TimeDelta::hours(24));
        let stats = handler.get_error_statistics();
        assert_eq!(stats.open_circuit_breakers, 0);
        assert_eq!(stats.circuit_breakers[0].state, BreakerState::Closed);
    }

    #[test]
    fn statistics_aggregate_and_clear() {
        let (handler, clock) = handler();
        let err = BridgeError::Task("bad".to_string());
        let task_site = ErrorSite::new("task_queue", "draw_box", ErrorCategory::TaskExecution);

        handler.handle_error(&err, &task_site, None);
        clock.advance(TimeDelta::hours(2));
        handler.handle_error(&err, &site(), None);

        let stats = handler.get_error_statistics();
        assert_eq!(stats.total_errors, 2);
        assert_eq!(stats.recent_errors, 1);
        assert_eq!(stats.by_module["task_queue"], 1);
        assert_eq!(stats.by_category["HOST_API"], 1);
        assert_eq!(stats.by_severity["MEDIUM"], 1);
        assert_eq!(stats.circuit_breakers.len(), 2);

        let recent = handler.recent_records(10);
        assert_eq!(recent[0].module, "cam_ops");

        handler.clear_error_history();
        let stats = handler.get_error_statistics();
        assert_eq!(stats.total_errors, 0);
        assert!(stats.circuit_breakers.is_empty());
        assert_eq!(handler.history_len(), 0);
    }
}
