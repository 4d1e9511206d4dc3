use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Instant;

use super::TaskId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Scheduling class of a task.
///
/// Variants are declared lowest first so the derived `Ord` ranks
/// `Critical` highest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Priority {
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Leading component of the queue order key: smaller runs first.
    pub fn rank(self) -> u8 {
        4 - self.value()
    }
}

/// Called on the consumer thread once the task has run (or was rejected).
/// Must not block.
pub type CompletionCallback = Box<dyn FnOnce(bool, &Task) + Send + 'static>;

/// One deferred unit of host work.
///
/// Everything the handler needs is captured by value at enqueue time; once
/// the queue owns a `Task` nothing outside the queue can mutate it.
pub struct Task {
    task_id: TaskId,
    task_type: TaskType,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    priority: Priority,
    enqueued_at: Instant,
    origin: String,
    pub(crate) on_complete: Option<CompletionCallback>,
}

impl Task {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        task_id: TaskId,
        task_type: TaskType,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        priority: Priority,
        enqueued_at: Instant,
        origin: String,
        on_complete: Option<CompletionCallback>,
    ) -> Self {
        Self {
            task_id,
            task_type,
            args,
            kwargs,
            priority,
            enqueued_at,
            origin,
            on_complete,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("task_id", &self.task_id)
            .field("task_type", &self.task_type)
            .field("args", &self.args)
            .field("kwargs", &self.kwargs)
            .field("priority", &self.priority)
            .field("origin", &self.origin)
            .field("has_callback", &self.on_complete.is_some())
            .finish()
    }
}

/// Everything a producer supplies for one enqueue.
///
/// ```ignore
/// queue.enqueue(
///     TaskRequest::new("draw_box")
///         .args(vec![json!(5), json!(5), json!(5)])
///         .priority(Priority::High)
///         .origin("sketch_routes"),
/// );
/// ```
pub struct TaskRequest {
    pub(crate) task_type: TaskType,
    pub(crate) args: Vec<Value>,
    pub(crate) kwargs: Map<String, Value>,
    pub(crate) priority: Priority,
    pub(crate) origin: String,
    pub(crate) on_complete: Option<CompletionCallback>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<TaskType>) -> Self {
        Self {
            task_type: task_type.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            priority: Priority::Normal,
            origin: "unknown".to_string(),
            on_complete: None,
        }
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(bool, &Task) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Priority::Critical, 0)]
    #[case(Priority::High, 1)]
    #[case(Priority::Normal, 2)]
    #[case(Priority::Low, 3)]
    fn rank_puts_critical_first(#[case] priority: Priority, #[case] rank: u8) {
        assert_eq!(priority.rank(), rank);
    }

    #[test]
    fn priority_defaults_to_normal() {
        assert_eq!(Priority::default(), Priority::Normal);
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn priority_serializes_in_upper_case() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"HIGH\"");
        let p: Priority = serde_json::from_str("\"CRITICAL\"").unwrap();
        assert_eq!(p, Priority::Critical);
    }

    #[test]
    fn request_builder_collects_kwargs() {
        let req = TaskRequest::new("draw_box")
            .kwarg("plane", Value::from("XY"))
            .origin("tests");
        assert_eq!(req.task_type.as_str(), "draw_box");
        assert_eq!(req.kwargs["plane"], "XY");
        assert_eq!(req.priority, Priority::Normal);
        assert_eq!(req.origin, "tests");
    }
}
