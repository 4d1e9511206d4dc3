//! Built-in routes: connectivity probe, health, route listing, admin resets.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::app::Bridge;
use crate::domain::{ApiResponse, ErrorResponse, HttpMethod, RequestData};
use crate::error::BridgeError;
use crate::fault::{ErrorHandler, ErrorStatistics};
use crate::queue::{QueueStats, TaskQueue};
use crate::router::{ROUTER_MODULE, Router, RouterStats};

const SYSTEM_CATEGORY: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Why the bridge is degraded; empty when healthy.
    pub reasons: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub router: RouterStats,
    pub queue: QueueStats,
    pub errors: ErrorStatistics,
}

/// Degraded while a circuit breaker is open or a drain has been running
/// longer than the stall threshold.
pub fn health_report(bridge: &Bridge) -> HealthReport {
    build_report(
        &bridge.router,
        &bridge.queue,
        &bridge.errors,
        bridge.started_at,
        bridge.clock.now(),
        bridge.config.pump.stall_threshold(),
    )
}

fn build_report(
    router: &Router,
    queue: &TaskQueue,
    errors: &ErrorHandler,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
    stall_threshold: Duration,
) -> HealthReport {
    let queue_stats = queue.get_stats();
    let error_stats = errors.get_error_statistics();

    let mut reasons = Vec::new();
    if error_stats.open_circuit_breakers > 0 {
        reasons.push(format!("{} circuit breaker(s) open", error_stats.open_circuit_breakers));
    }
    if let Some(running_ms) = queue_stats.drain_in_progress_ms
        && Duration::from_millis(running_ms) > stall_threshold
    {
        reasons.push(format!("main-thread drain running for {running_ms} ms"));
    }

    HealthReport {
        status: if reasons.is_empty() { HealthStatus::Healthy } else { HealthStatus::Degraded },
        reasons,
        started_at,
        uptime_secs: (now - started_at).num_seconds(),
        router: router.get_stats(),
        queue: queue_stats,
        errors: error_stats,
    }
}

/// Register `/ping`, `/health`, `/routes` and the admin resets on the
/// bridge router.
pub fn register_system_routes(bridge: &Bridge) -> Result<(), BridgeError> {
    let router = &bridge.router;

    router.register_handler(
        "/ping",
        |_data: RequestData| -> Result<ApiResponse, BridgeError> {
            Ok(ApiResponse::message(200, "pong"))
        },
        &[HttpMethod::Get],
        SYSTEM_CATEGORY,
        ROUTER_MODULE,
    )?;

    // Routes live inside the router; hold it weakly so it can be dropped.
    let weak_router: Weak<Router> = Arc::downgrade(router);
    let queue = Arc::clone(&bridge.queue);
    let errors = Arc::clone(&bridge.errors);
    let clock = Arc::clone(&bridge.clock);
    let started_at = bridge.started_at;
    let stall_threshold = bridge.config.pump.stall_threshold();
    router.register_handler(
        "/health",
        move |_data: RequestData| -> Result<ApiResponse, BridgeError> {
            let Some(router) = weak_router.upgrade() else {
                return Ok(ErrorResponse::new(503, "SHUTTING_DOWN", "router is shutting down").into());
            };
            let report =
                build_report(&router, &queue, &errors, started_at, clock.now(), stall_threshold);
            Ok(ApiResponse::ok(serde_json::to_value(report)?))
        },
        &[HttpMethod::Get],
        SYSTEM_CATEGORY,
        ROUTER_MODULE,
    )?;

    let weak_router: Weak<Router> = Arc::downgrade(router);
    router.register_handler(
        "/routes",
        move |_data: RequestData| -> Result<ApiResponse, BridgeError> {
            let Some(router) = weak_router.upgrade() else {
                return Ok(ErrorResponse::new(503, "SHUTTING_DOWN", "router is shutting down").into());
            };
            let problems: Vec<String> =
                router.validate_routes().iter().map(ToString::to_string).collect();
            Ok(ApiResponse::ok(json!({
                "routes": router.get_routes(),
                "problems": problems,
            })))
        },
        &[HttpMethod::Get],
        SYSTEM_CATEGORY,
        ROUTER_MODULE,
    )?;

    let queue = Arc::clone(&bridge.queue);
    router.register_handler(
        "/admin/queue/clear",
        move |_data: RequestData| -> Result<ApiResponse, BridgeError> {
            let discarded = queue.clear_queue();
            Ok(ApiResponse::ok(json!({ "discarded": discarded })))
        },
        &[HttpMethod::Post],
        SYSTEM_CATEGORY,
        ROUTER_MODULE,
    )?;

    let errors = Arc::clone(&bridge.errors);
    router.register_handler(
        "/admin/errors/clear",
        move |_data: RequestData| -> Result<ApiResponse, BridgeError> {
            errors.clear_error_history();
            Ok(ApiResponse::message(200, "error history and circuit breakers cleared"))
        },
        &[HttpMethod::Post],
        SYSTEM_CATEGORY,
        ROUTER_MODULE,
    )?;

    Ok(())
}
