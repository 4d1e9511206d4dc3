use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::middleware::Middleware;
use super::route::{Route, RouteHandler, RouteInfo, RouteProblem};
use super::validation::RequestValidator;
use super::RoutePattern;
use crate::domain::{ApiResponse, ErrorResponse, HttpMethod, RequestData};
use crate::error::BridgeError;
use crate::fault::{ErrorCategory, ErrorHandler, ErrorSeverity, ErrorSite};
use crate::queue::panic_message;

pub const ROUTER_MODULE: &str = "router";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub requests_routed: u64,
    pub requests_failed: u64,
    pub routes_registered: usize,
}

/// Maps `(path, method)` to a registered handler.
///
/// Routes are tried in registration order and the first match wins, so
/// registration order is part of the routing contract. Every failure on the
/// way (middleware, validation, handler) comes back as an error envelope;
/// `route` itself never fails.
pub struct Router {
    routes: RwLock<Vec<Route>>,
    rejected: Mutex<Vec<RouteProblem>>,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    validator: Arc<RequestValidator>,
    errors: Arc<ErrorHandler>,
    requests_routed: AtomicU64,
    requests_failed: AtomicU64,
}

impl Router {
    pub fn new(errors: Arc<ErrorHandler>, validator: Arc<RequestValidator>) -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
            rejected: Mutex::new(Vec::new()),
            middleware: RwLock::new(Vec::new()),
            validator,
            errors,
            requests_routed: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        }
    }

    pub fn validator(&self) -> &Arc<RequestValidator> {
        &self.validator
    }

    pub fn errors(&self) -> &Arc<ErrorHandler> {
        &self.errors
    }

    /// Register `handler` for `pattern` and `methods` (GET when empty).
    ///
    /// An invalid pattern is recorded as a CONFIGURATION error and returned;
    /// nothing is registered. Registering the same pattern and method set
    /// twice is also recorded, but the second route is kept so
    /// `validate_routes` can point at it; the first one keeps winning.
    pub fn register_handler<F>(
        &self,
        pattern: &str,
        handler: F,
        methods: &[HttpMethod],
        category: &str,
        owner_module: &str,
    ) -> Result<(), BridgeError>
    where
        F: Fn(RequestData) -> Result<ApiResponse, BridgeError> + Send + Sync + 'static,
    {
        self.register_route(pattern, Arc::new(handler), methods, category, owner_module)
    }

    pub fn register_route(
        &self,
        pattern: &str,
        handler: Arc<dyn RouteHandler>,
        methods: &[HttpMethod],
        category: &str,
        owner_module: &str,
    ) -> Result<(), BridgeError> {
        let site = ErrorSite::new(owner_module, "register_handler", ErrorCategory::Configuration)
            .severity(ErrorSeverity::High);

        let compiled = match RoutePattern::compile(pattern) {
            Ok(compiled) => compiled,
            Err(err) => {
                self.rejected.lock().push(RouteProblem::UncompilablePattern {
                    pattern: pattern.to_string(),
                    reason: err.to_string(),
                });
                self.errors
                    .record_config_error(&err, &site, Some(json!({ "pattern": pattern })));
                return Err(err);
            }
        };

        let mut methods: BTreeSet<HttpMethod> = methods.iter().copied().collect();
        if methods.is_empty() {
            methods.insert(HttpMethod::Get);
        }

        let (index, duplicate_of) = {
            let mut routes = self.routes.write();
            let duplicate_of = routes
                .iter()
                .position(|r| r.pattern.as_str() == pattern && r.methods == methods);
            routes.push(Route {
                pattern: compiled,
                handler,
                methods: methods.clone(),
                category: category.to_string(),
                owner_module: owner_module.to_string(),
            });
            (routes.len() - 1, duplicate_of)
        };

        if let Some(first) = duplicate_of {
            let err = BridgeError::Config(format!(
                "route {pattern} {methods:?} is already registered as #{first}; #{index} is unreachable"
            ));
            self.errors.record_config_error(
                &err,
                &site.severity(ErrorSeverity::Medium),
                Some(json!({ "pattern": pattern, "first_index": first, "duplicate_index": index })),
            );
        } else {
            info!(route = pattern, ?methods, category, owner_module, "route registered");
        }
        Ok(())
    }

    /// Middleware runs in registration order before validation.
    pub fn add_middleware(&self, middleware: impl Middleware + 'static) {
        self.middleware.write().push(Arc::new(middleware));
    }

    pub fn route(&self, path: &str, method: &str, data: RequestData) -> ApiResponse {
        self.requests_routed.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let response = self.dispatch(path, method, data);
        if response.is_error() {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            route = path,
            method,
            status = response.status(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request routed"
        );
        response
    }

    fn dispatch(&self, path: &str, method: &str, data: RequestData) -> ApiResponse {
        let Ok(method) = method.parse::<HttpMethod>() else {
            return ErrorResponse::new(
                405,
                "METHOD_NOT_ALLOWED",
                format!("HTTP method '{method}' is not supported"),
            )
            .into();
        };

        let data = match self.run_middleware(path, method, data) {
            Ok(Some(data)) => data,
            Ok(None) => {
                return ErrorResponse::new(403, "FORBIDDEN", format!("{method} {path} was refused"))
                    .into();
            }
            Err(response) => return response.into(),
        };

        let mut data = match self.validator.validate(path, method, data) {
            Ok(data) => data,
            Err(err) => return self.reject_invalid(&err, ROUTER_MODULE, path).into(),
        };

        let Some((route_pattern, owner_module, handler, captures)) = self.find(path, method) else {
            return ErrorResponse::new(404, "NOT_FOUND", format!("no route for {method} {path}"))
                .into();
        };

        for (name, value) in captures {
            data.insert(name, value);
        }

        if self
            .errors
            .is_circuit_open(&owner_module, &route_pattern, ErrorCategory::RequestHandling)
        {
            warn!(route = %route_pattern, owner_module = %owner_module, "circuit open; request rejected");
            return ErrorHandler::circuit_open_response().into();
        }

        let site = ErrorSite::new(&owner_module, &route_pattern, ErrorCategory::RequestHandling);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.call(data)));
        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) if err.category() == ErrorCategory::Validation => {
                self.reject_invalid(&err, &owner_module, path).into()
            }
            Ok(Err(err)) => {
                let context = json!({
                    "path": path,
                    "method": method,
                    "error_category": err.category(),
                });
                self.errors.handle_error(&err, &site, Some(context)).into()
            }
            Err(payload) => {
                let err = BridgeError::Panic(panic_message(payload.as_ref()));
                let context = json!({ "path": path, "method": method });
                self.errors
                    .handle_error(&err, &site.severity(ErrorSeverity::High), Some(context))
                    .into()
            }
        }
    }

    fn run_middleware(
        &self,
        path: &str,
        method: HttpMethod,
        mut data: RequestData,
    ) -> Result<Option<RequestData>, ErrorResponse> {
        let chain: Vec<Arc<dyn Middleware>> = self.middleware.read().clone();
        for (index, middleware) in chain.iter().enumerate() {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| middleware.process(path, method, data)));
            let site = ErrorSite::new(ROUTER_MODULE, "middleware", ErrorCategory::RequestHandling);
            let context = json!({ "path": path, "method": method, "middleware_index": index });
            data = match outcome {
                Ok(Ok(Some(next))) => next,
                Ok(Ok(None)) => {
                    debug!(route = path, %method, index, "request refused by middleware");
                    return Ok(None);
                }
                Ok(Err(err)) => return Err(self.errors.handle_error(&err, &site, Some(context))),
                Err(payload) => {
                    let err = BridgeError::Panic(panic_message(payload.as_ref()));
                    return Err(self.errors.handle_error(
                        &err,
                        &site.severity(ErrorSeverity::High),
                        Some(context),
                    ));
                }
            };
        }
        Ok(Some(data))
    }

    /// 400 for bad input. Not recorded: client mistakes must not trip breakers.
    fn reject_invalid(&self, err: &BridgeError, module: &str, path: &str) -> ErrorResponse {
        debug!(route = path, "request rejected: {err}");
        let context = match err {
            BridgeError::Validation { field, reason } => {
                json!({ "path": path, "field": field, "reason": reason })
            }
            _ => json!({ "path": path }),
        };
        let site = ErrorSite::new(module, "validate", ErrorCategory::Validation)
            .severity(ErrorSeverity::Low);
        ErrorHandler::describe(err, &site, Some(context))
    }

    /// First route matching both path and method. The handler is cloned out
    /// so the table lock is not held while it runs.
    fn find(
        &self,
        path: &str,
        method: HttpMethod,
    ) -> Option<(String, String, Arc<dyn RouteHandler>, serde_json::Map<String, Value>)> {
        let routes = self.routes.read();
        routes.iter().find_map(|route| {
            if !route.methods.contains(&method) {
                return None;
            }
            let captures = route.pattern.captures(path)?;
            Some((
                route.pattern.as_str().to_string(),
                route.owner_module.clone(),
                Arc::clone(&route.handler),
                captures,
            ))
        })
    }

    pub fn get_routes(&self) -> Vec<RouteInfo> {
        self.routes.read().iter().map(Route::info).collect()
    }

    pub fn get_routes_by_category(&self, category: &str) -> Vec<RouteInfo> {
        self.routes
            .read()
            .iter()
            .filter(|r| r.category == category)
            .map(Route::info)
            .collect()
    }

    pub fn get_stats(&self) -> RouterStats {
        RouterStats {
            requests_routed: self.requests_routed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            routes_registered: self.routes.read().len(),
        }
    }

    /// Structural self-check for startup. Read only.
    pub fn validate_routes(&self) -> Vec<RouteProblem> {
        let mut problems = self.rejected.lock().clone();
        let routes = self.routes.read();
        for (later_index, later) in routes.iter().enumerate() {
            for (first_index, first) in routes[..later_index].iter().enumerate() {
                if first.pattern.as_str() != later.pattern.as_str() {
                    continue;
                }
                if first.methods == later.methods {
                    problems.push(RouteProblem::Duplicate {
                        pattern: later.pattern.as_str().to_string(),
                        methods: later.methods.iter().copied().collect(),
                        first_index,
                        duplicate_index: later_index,
                    });
                    break;
                }
                let shared: Vec<HttpMethod> =
                    first.methods.intersection(&later.methods).copied().collect();
                if !shared.is_empty() {
                    problems.push(RouteProblem::OverlappingMethods {
                        pattern: later.pattern.as_str().to_string(),
                        shared,
                        first_index,
                        later_index,
                    });
                }
            }
        }
        problems
    }
}
