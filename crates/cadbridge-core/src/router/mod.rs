//! Request router: patterns, middleware, validation, first-match dispatch.

mod dispatch;
mod middleware;
mod pattern;
mod route;
mod validation;

pub use dispatch::{ROUTER_MODULE, Router, RouterStats};
pub use middleware::Middleware;
pub use pattern::RoutePattern;
pub use route::{Route, RouteHandler, RouteInfo, RouteProblem};
pub use validation::{ParamKind, ParamRule, RequestValidator, VALIDATOR_MODULE};
