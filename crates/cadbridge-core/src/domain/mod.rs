//! Domain model: ids, tasks, and the HTTP envelope.

pub mod http;
pub mod ids;
pub mod task;

pub use http::{ApiResponse, ErrorResponse, HttpMethod, RequestData, UnknownMethod};
pub use ids::{RequestId, TaskId};
pub use task::{CompletionCallback, Priority, Task, TaskRequest, TaskType};
