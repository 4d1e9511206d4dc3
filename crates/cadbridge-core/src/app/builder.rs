//! BridgeBuilder: wires the error handler, task queue, validator and router.
//!
//! Startup checks fail fast: a bad config or a task type the host code
//! expects but nobody registered stops `build()` with a clear error instead
//! of surfacing later as a failed task.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use crate::config::BridgeConfig;
use crate::domain::TaskType;
use crate::error::BridgeError;
use crate::fault::ErrorHandler;
use crate::ports::{Clock, SystemClock};
use crate::pump::MainThreadPump;
use crate::queue::{TaskHandler, TaskQueue};
use crate::router::{RequestValidator, Router};
use crate::typed::{HostOperation, OperationHandler, TypedHandler};

/// # Example
/// ```ignore
/// let bridge = BridgeBuilder::new(config)
///     .operation::<DrawBox, _>(draw_box)
///     .expect_tasks(&["draw_box"])
///     .build()?;
/// ```
pub struct BridgeBuilder {
    config: BridgeConfig,
    clock: Arc<dyn Clock>,
    handlers: Vec<(TaskType, Arc<dyn TaskHandler>)>,
    expected_tasks: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Config(#[from] BridgeError),
}

impl BridgeBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            handlers: Vec::new(),
            expected_tasks: None,
        }
    }

    /// Replace the system clock (tests drive breaker windows with a `FixedClock`).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn task_handler<F>(mut self, task_type: impl Into<TaskType>, handler: F) -> Self
    where
        F: Fn(&[Value], &Map<String, Value>) -> Result<Value, BridgeError> + Send + Sync + 'static,
    {
        self.handlers.push((task_type.into(), Arc::new(handler)));
        self
    }

    pub fn operation<T, H>(mut self, handler: H) -> Self
    where
        T: HostOperation,
        H: OperationHandler<T> + 'static,
    {
        self.handlers
            .push((TaskType::new(T::TYPE), Arc::new(TypedHandler::<T, H>::new(handler))));
        self
    }

    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Bridge, BuildError> {
        self.config.validate()?;

        let errors = Arc::new(ErrorHandler::new(&self.config.errors, Arc::clone(&self.clock)));
        let queue = Arc::new(TaskQueue::new(Arc::clone(&errors), Arc::clone(&self.clock)));
        for (task_type, handler) in self.handlers {
            queue.register_dyn_handler(task_type, handler);
        }

        if let Some(expected) = &self.expected_tasks {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !queue.is_handler_registered(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }

        let validator = Arc::new(RequestValidator::new(Arc::clone(&errors)));
        let router = Arc::new(Router::new(Arc::clone(&errors), Arc::clone(&validator)));

        info!(
            task_types = ?queue.registered_types(),
            bind = %self.config.bind_addr(),
            "bridge assembled"
        );

        Ok(Bridge {
            started_at: self.clock.now(),
            config: Arc::new(self.config),
            clock: self.clock,
            errors,
            queue,
            validator,
            router,
        })
    }
}

/// The assembled bridge. Cheap to clone; every part is shared.
#[derive(Clone)]
pub struct Bridge {
    pub config: Arc<BridgeConfig>,
    pub clock: Arc<dyn Clock>,
    pub errors: Arc<ErrorHandler>,
    pub queue: Arc<TaskQueue>,
    pub validator: Arc<RequestValidator>,
    pub router: Arc<Router>,
    pub started_at: DateTime<Utc>,
}

impl Bridge {
    /// Create the pump on the calling thread, which becomes the only thread
    /// allowed to drain the queue.
    pub fn pump(&self) -> Result<MainThreadPump, BridgeError> {
        MainThreadPump::new(Arc::clone(&self.queue), self.config.pump.interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::operation::tests::MoveBody;
    use serde_json::json;

    fn noop(_: &[Value], _: &Map<String, Value>) -> Result<Value, BridgeError> {
        Ok(Value::Null)
    }

    #[test]
    fn build_registers_handlers() {
        let bridge = BridgeBuilder::new(BridgeConfig::default())
            .task_handler("refresh_view", noop)
            .operation::<MoveBody, _>(|op: MoveBody| -> Result<Value, BridgeError> { Ok(json!(op.dx)) })
            .expect_tasks(&["refresh_view", "move_body"])
            .build()
            .unwrap();

        assert_eq!(bridge.queue.registered_types(), vec!["move_body", "refresh_view"]);
        assert_eq!(bridge.router.get_stats().routes_registered, 0);
    }

    #[test]
    fn missing_task_types_fail_the_build() {
        let result = BridgeBuilder::new(BridgeConfig::default())
            .task_handler("refresh_view", noop)
            .expect_tasks(&["refresh_view", "draw_box"])
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec!["draw_box".to_string()]
        ));
    }

    #[test]
    fn invalid_config_fails_the_build() {
        let mut config = BridgeConfig::default();
        config.pump.interval_ms = 0;
        let result = BridgeBuilder::new(config).build();
        assert!(matches!(result, Err(BuildError::Config(BridgeError::Config(_)))));
    }
}
