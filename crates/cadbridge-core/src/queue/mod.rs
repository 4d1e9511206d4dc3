//! Task queue: handler registry, priority store, and drain loop.

mod handler;
mod memory;
mod stats;

pub use handler::{HandlerRegistry, TaskHandler};
pub use memory::{QUEUE_MODULE, TaskQueue};
pub use stats::QueueStats;

pub(crate) use memory::panic_message;
