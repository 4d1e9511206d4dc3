//! Error classification, history and circuit breakers.

mod breaker;
mod handler;
mod record;
mod taxonomy;

pub use breaker::{BreakerKey, BreakerSnapshot, BreakerState, CircuitBreakerTable};
pub use handler::{CIRCUIT_OPEN_CODE, ErrorHandler, ErrorSite};
pub use record::{ErrorRecord, ErrorStatistics};
pub use taxonomy::{ErrorCategory, ErrorSeverity, recovery_suggestions};
