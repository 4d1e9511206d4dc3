use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::TaskType;
use crate::error::BridgeError;

/// Executes one host operation with the arguments captured at enqueue time.
///
/// Only ever called from the queue's consumer thread, so implementations may
/// touch host APIs that are bound to that thread.
pub trait TaskHandler: Send + Sync {
    fn handle(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, BridgeError>;
}

impl<F> TaskHandler for F
where
    F: Fn(&[Value], &Map<String, Value>) -> Result<Value, BridgeError> + Send + Sync,
{
    fn handle(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, BridgeError> {
        self(args, kwargs)
    }
}

/// Registry of handlers (task_type -> handler).
///
/// Modules may register while the bridge is running, so the map sits behind
/// a lock. Last registration for a type wins.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        let previous = self.handlers.write().insert(task_type.clone(), handler);
        if previous.is_some() {
            warn!(task_type = %task_type, "task handler replaced");
        } else {
            debug!(task_type = %task_type, "task handler registered");
        }
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers.read().contains_key(task_type)
    }

    /// Sorted, for stable output.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .read()
            .keys()
            .map(|t| t.as_str().to_string())
            .collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}
