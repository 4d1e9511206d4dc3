//! cadbridge-core
//!
//! Lets HTTP requests drive a host application whose API may only be called
//! from its main thread (CAD/CAM hosts, typically).
//!
//! # Modules
//! - **router**: `{name}` patterns, middleware, validation, first-match dispatch
//! - **queue**: priority task queue and the task handler registry
//! - **pump**: main-thread pump that drains the queue on the host thread
//! - **fault**: error taxonomy, history and circuit breakers
//! - **server**: axum glue and the built-in system routes
//! - **typed**: typed host operations over the string-keyed registry
//! - **app**: `BridgeBuilder` wiring everything together
//! - **domain** / **ports**: shared types, clock and id injection

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fault;
pub mod ports;
pub mod pump;
pub mod queue;
pub mod router;
pub mod server;
pub mod typed;

pub use app::{Bridge, BridgeBuilder, BuildError};
pub use config::BridgeConfig;
pub use domain::{ApiResponse, ErrorResponse, HttpMethod, Priority, RequestData, TaskRequest, TaskType};
pub use error::BridgeError;
pub use fault::{ErrorCategory, ErrorHandler, ErrorSeverity, ErrorSite};
pub use pump::{HostLoop, MainThreadPump};
pub use queue::TaskQueue;
pub use router::Router;
