//! In-memory priority task queue.

use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::{HandlerRegistry, QueueStats, TaskHandler};
use crate::domain::{Task, TaskId, TaskRequest, TaskType};
use crate::error::BridgeError;
use crate::fault::{ErrorCategory, ErrorHandler, ErrorSeverity, ErrorSite};
use crate::ports::{Clock, IdGenerator, UlidGenerator};

/// Module name under which task failures are recorded and breakers keyed.
pub const QUEUE_MODULE: &str = "task_queue";

/// Heap entry.
///
/// Order key is `(priority rank, enqueued_at, seq)`, smallest first. The
/// `Ord` impl is reversed so the max-heap `BinaryHeap` pops the smallest key.
/// `seq` breaks ties between enqueues that read the same `Instant`.
struct QueueEntry {
    rank: u8,
    enqueued_at: Instant,
    seq: u64,
    task: Task,
}

impl QueueEntry {
    fn key(&self) -> (u8, Instant, u64) {
        (self.rank, self.enqueued_at, self.seq)
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.key().cmp(&self.key())
    }
}

struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
    tasks_queued: u64,
    tasks_processed: u64,
    tasks_failed: u64,
    last_process_time: Option<DateTime<Utc>>,
    drain_started: Option<Instant>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            tasks_queued: 0,
            tasks_processed: 0,
            tasks_failed: 0,
            last_process_time: None,
            drain_started: None,
        }
    }
}

/// Resets the `draining` flag when the drain ends, even by panic.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Many-producer, single-consumer priority queue of host tasks.
///
/// Producers (HTTP worker threads) call `enqueue`, which never blocks on the
/// consumer. The consumer (the main-thread pump) calls `drain`, which runs
/// every queued task on the calling thread. Handlers run outside the queue
/// lock, so a handler may enqueue follow-up work.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    registry: HandlerRegistry,
    errors: Arc<ErrorHandler>,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
    draining: AtomicBool,
    consumer: OnceLock<ThreadId>,
}

impl TaskQueue {
    pub fn new(errors: Arc<ErrorHandler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
            registry: HandlerRegistry::new(),
            errors,
            ids: Box::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
            draining: AtomicBool::new(false),
            consumer: OnceLock::new(),
        }
    }

    /// Register (or replace) the handler for `task_type`.
    pub fn register_handler<F>(&self, task_type: impl Into<TaskType>, handler: F)
    where
        F: Fn(&[Value], &Map<String, Value>) -> Result<Value, BridgeError> + Send + Sync + 'static,
    {
        self.registry.register(task_type.into(), Arc::new(handler));
    }

    /// Register a handler that is already a trait object (e.g. a typed
    /// operation adapter).
    pub fn register_dyn_handler(&self, task_type: impl Into<TaskType>, handler: Arc<dyn TaskHandler>) {
        self.registry.register(task_type.into(), handler);
    }

    pub fn is_handler_registered(&self, task_type: &str) -> bool {
        self.registry.contains(&TaskType::new(task_type))
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.registry.registered_types()
    }

    /// Pin draining to the calling thread. After this, `drain` from any other
    /// thread runs nothing.
    pub fn bind_consumer_thread(&self) -> Result<(), BridgeError> {
        let current = thread::current().id();
        let owner = *self.consumer.get_or_init(|| current);
        if owner != current {
            return Err(BridgeError::Config(format!(
                "task queue already bound to consumer thread {owner:?}"
            )));
        }
        Ok(())
    }

    /// Add a task. Constant time apart from the heap insert; never waits for
    /// the consumer and never fails (the queue is unbounded).
    pub fn enqueue(&self, request: TaskRequest) -> TaskId {
        let TaskRequest {
            task_type,
            args,
            kwargs,
            priority,
            origin,
            on_complete,
        } = request;
        let task_id = self.ids.generate_task_id();
        let type_name = task_type.clone();

        let depth = {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            // Read the clock under the lock so timestamp order matches seq order.
            let enqueued_at = Instant::now();
            let task = Task::new(
                task_id,
                task_type,
                args,
                kwargs,
                priority,
                enqueued_at,
                origin,
                on_complete,
            );
            state.heap.push(QueueEntry {
                rank: priority.rank(),
                enqueued_at,
                seq,
                task,
            });
            state.tasks_queued += 1;
            state.heap.len()
        };

        debug!(%task_id, task_type = %type_name, ?priority, depth, "task enqueued");
        task_id
    }

    /// Run every queued task, highest priority first, on the calling thread.
    ///
    /// Returns the number of tasks attempted, failures included. Returns 0
    /// without touching the queue when another drain is already running or
    /// when called off the bound consumer thread.
    pub fn drain(&self) -> usize {
        self.try_drain().unwrap_or(0)
    }

    /// Like `drain`, but `None` when the drain was refused.
    pub fn try_drain(&self) -> Option<usize> {
        if let Some(owner) = self.consumer.get()
            && *owner != thread::current().id()
        {
            error!(owner = ?owner, "drain called off the consumer thread; ignored");
            return None;
        }

        let Some(_guard) = DrainGuard::try_acquire(&self.draining) else {
            debug!("drain already in progress; skipped");
            return None;
        };

        self.state.lock().drain_started = Some(Instant::now());

        let mut attempted = 0;
        loop {
            let next = self.state.lock().heap.pop();
            let Some(entry) = next else {
                break;
            };
            attempted += 1;

            let mut task = entry.task;
            let success = self.execute(&task);
            {
                let mut state = self.state.lock();
                if success {
                    state.tasks_processed += 1;
                } else {
                    state.tasks_failed += 1;
                }
            }
            Self::complete(&mut task, success);
        }

        let mut state = self.state.lock();
        state.drain_started = None;
        if attempted > 0 {
            state.last_process_time = Some(self.clock.now());
        }
        Some(attempted)
    }

    /// Discard every pending task without running it or its callback.
    pub fn clear_queue(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            let n = state.heap.len();
            state.heap.clear();
            n
        };
        warn!(discarded, "task queue cleared; pending tasks discarded");
        discarded
    }

    pub fn get_queue_size(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn get_stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            tasks_queued: state.tasks_queued,
            tasks_processed: state.tasks_processed,
            tasks_failed: state.tasks_failed,
            queue_size: state.heap.len(),
            registered_handlers: self.registry.len(),
            last_process_time: state.last_process_time,
            drain_in_progress_ms: state
                .drain_started
                .map(|started| started.elapsed().as_millis() as u64),
        }
    }

    fn execute(&self, task: &Task) -> bool {
        let task_type = task.task_type();
        let site = ErrorSite::new(QUEUE_MODULE, task_type.as_str(), ErrorCategory::TaskExecution);

        if self
            .errors
            .is_circuit_open(QUEUE_MODULE, task_type.as_str(), ErrorCategory::TaskExecution)
        {
            warn!(task_id = %task.task_id(), task_type = %task_type, "circuit open; task rejected");
            return false;
        }

        let Some(handler) = self.registry.get(task_type) else {
            let err = BridgeError::HandlerNotFound(task_type.clone());
            self.errors.handle_error(
                &err,
                &site.severity(ErrorSeverity::High),
                Some(task_context(task)),
            );
            return false;
        };

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.handle(task.args(), task.kwargs())
        }));
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(_result)) => {
                info!(
                    task_id = %task.task_id(),
                    task_type = %task_type,
                    origin = task.origin(),
                    elapsed_ms,
                    "task completed"
                );
                true
            }
            Ok(Err(err)) => {
                self.errors
                    .handle_error(&err, &site, Some(task_context(task)));
                false
            }
            Err(payload) => {
                let err = BridgeError::Panic(panic_message(payload.as_ref()));
                self.errors.handle_error(
                    &err,
                    &site.severity(ErrorSeverity::High),
                    Some(task_context(task)),
                );
                false
            }
        }
    }

    fn complete(task: &mut Task, success: bool) {
        let Some(callback) = task.on_complete.take() else {
            return;
        };
        let task: &Task = task;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(success, task))) {
            error!(
                task_id = %task.task_id(),
                task_type = %task.task_type(),
                "completion callback panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

fn task_context(task: &Task) -> Value {
    json!({
        "task_id": task.task_id().to_string(),
        "origin": task.origin(),
        "priority": task.priority(),
        "arg_count": task.args().len(),
        "kwarg_keys": task.kwargs().keys().collect::<Vec<_>>(),
    })
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorsConfig;
    use crate::domain::Priority;
    use crate::ports::SystemClock;

    fn queue() -> TaskQueue {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let errors = Arc::new(ErrorHandler::new(&ErrorsConfig::default(), clock.clone()));
        TaskQueue::new(errors, clock)
    }

    fn noop(_: &[Value], _: &Map<String, Value>) -> Result<Value, BridgeError> {
        Ok(Value::Null)
    }

    #[test]
    fn enqueue_and_size() {
        let queue = queue();
        queue.enqueue(TaskRequest::new("noop"));
        queue.enqueue(TaskRequest::new("noop"));

        assert_eq!(queue.get_queue_size(), 2);
        assert_eq!(queue.get_stats().tasks_queued, 2);
    }

    #[test]
    fn drain_empties_and_counts() {
        let queue = queue();
        queue.register_handler("noop", noop);
        queue.enqueue(TaskRequest::new("noop"));

        assert_eq!(queue.drain(), 1);
        assert_eq!(queue.drain(), 0);

        let stats = queue.get_stats();
        assert_eq!(stats.tasks_processed, 1);
        assert_eq!(stats.tasks_failed, 0);
        assert_eq!(stats.queue_size, 0);
        assert!(stats.last_process_time.is_some());
        assert!(stats.drain_in_progress_ms.is_none());
    }

    #[test]
    fn heap_orders_by_rank_then_age() {
        let queue = queue();
        queue.enqueue(TaskRequest::new("a").priority(Priority::Low));
        queue.enqueue(TaskRequest::new("b").priority(Priority::Critical));
        queue.enqueue(TaskRequest::new("c").priority(Priority::Critical));

        let mut state = queue.state.lock();
        let order: Vec<String> = std::iter::from_fn(|| state.heap.pop())
            .map(|e| e.task.task_type().to_string())
            .collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn clear_discards_without_running() {
        let queue = queue();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        queue.enqueue(TaskRequest::new("noop").on_complete(move |_, _| {
            flag.store(true, Ordering::SeqCst);
        }));

        assert_eq!(queue.clear_queue(), 1);
        assert_eq!(queue.drain(), 0);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_handler_is_isolated() {
        let queue = queue();
        queue.register_handler("boom", |_: &[Value], _: &Map<String, Value>| -> Result<Value, BridgeError> {
            panic!("host exploded")
        });
        queue.register_handler("noop", noop);
        queue.enqueue(TaskRequest::new("boom"));
        queue.enqueue(TaskRequest::new("noop"));

        assert_eq!(queue.drain(), 2);
        let stats = queue.get_stats();
        assert_eq!(stats.tasks_failed, 1);
        assert_eq!(stats.tasks_processed, 1);

        let record = &queue.errors.recent_records(1)[0];
        assert_eq!(record.severity, ErrorSeverity::High);
        assert!(record.message.contains("host exploded"));
    }

    #[test]
    fn panicking_callback_does_not_stop_the_drain() {
        let queue = queue();
        queue.register_handler("noop", noop);
        queue.enqueue(TaskRequest::new("noop").on_complete(|_, _| panic!("callback bug")));
        queue.enqueue(TaskRequest::new("noop"));

        assert_eq!(queue.drain(), 2);
        assert_eq!(queue.get_stats().tasks_processed, 2);
    }

    #[test]
    fn drain_off_the_bound_thread_runs_nothing() {
        let queue = Arc::new(queue());
        queue.register_handler("noop", noop);
        queue.bind_consumer_thread().unwrap();
        queue.enqueue(TaskRequest::new("noop"));

        let other = Arc::clone(&queue);
        let drained = thread::spawn(move || {
            assert!(other.bind_consumer_thread().is_err());
            other.drain()
        })
        .join()
        .unwrap();

        assert_eq!(drained, 0);
        assert_eq!(queue.get_queue_size(), 1);
        assert_eq!(queue.drain(), 1);
    }

    #[test]
    fn panic_message_reads_both_payload_kinds() {
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn std::any::Any + Send> = Box::new("borrowed");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
    }
}
