use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::RoutePattern;
use crate::domain::{ApiResponse, HttpMethod, RequestData};
use crate::error::BridgeError;

/// Handles one request. Errors are turned into error envelopes by the router.
pub trait RouteHandler: Send + Sync {
    fn call(&self, data: RequestData) -> Result<ApiResponse, BridgeError>;
}

impl<F> RouteHandler for F
where
    F: Fn(RequestData) -> Result<ApiResponse, BridgeError> + Send + Sync,
{
    fn call(&self, data: RequestData) -> Result<ApiResponse, BridgeError> {
        self(data)
    }
}

/// (pattern, methods) -> handler binding. The pattern is compiled once at
/// registration and never changes afterwards.
#[derive(Clone)]
pub struct Route {
    pub(crate) pattern: RoutePattern,
    pub(crate) handler: Arc<dyn RouteHandler>,
    pub(crate) methods: BTreeSet<HttpMethod>,
    pub(crate) category: String,
    pub(crate) owner_module: String,
}

impl Route {
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn methods(&self) -> &BTreeSet<HttpMethod> {
        &self.methods
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn owner_module(&self) -> &str {
        &self.owner_module
    }

    pub(crate) fn info(&self) -> RouteInfo {
        RouteInfo {
            pattern: self.pattern.as_str().to_string(),
            methods: self.methods.iter().copied().collect(),
            category: self.category.clone(),
            owner_module: self.owner_module.clone(),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern.as_str())
            .field("methods", &self.methods)
            .field("category", &self.category)
            .field("owner_module", &self.owner_module)
            .finish()
    }
}

/// Serializable description of a registered route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    pub pattern: String,
    pub methods: Vec<HttpMethod>,
    pub category: String,
    pub owner_module: String,
}

/// Structural problem found by `Router::validate_routes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteProblem {
    /// Same pattern and same method set; only the first is reachable.
    Duplicate { pattern: String, methods: Vec<HttpMethod>, first_index: usize, duplicate_index: usize },
    /// Same pattern, method sets overlap without being equal; the shared
    /// methods always dispatch to the earlier route.
    OverlappingMethods { pattern: String, shared: Vec<HttpMethod>, first_index: usize, later_index: usize },
    /// Registration was rejected; the route does not exist.
    UncompilablePattern { pattern: String, reason: String },
}

impl fmt::Display for RouteProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteProblem::Duplicate { pattern, methods, first_index, duplicate_index } => write!(
                f,
                "route #{duplicate_index} duplicates #{first_index}: {pattern} {methods:?}"
            ),
            RouteProblem::OverlappingMethods { pattern, shared, first_index, later_index } => write!(
                f,
                "route #{later_index} shares {shared:?} with #{first_index} on {pattern}"
            ),
            RouteProblem::UncompilablePattern { pattern, reason } => {
                write!(f, "pattern {pattern} was rejected: {reason}")
            }
        }
    }
}
