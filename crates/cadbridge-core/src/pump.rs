//! Main-thread pump: the only place queued tasks are executed.
//!
//! The host owns its main thread and calls back into us on a timer. Each
//! callback is a `tick`, which drains the queue at most once per interval.
//! `HostLoop` plays the host when the process has no host of its own.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::queue::TaskQueue;

/// Drains the task queue on the thread that created it.
///
/// Not `Send`: the pump cannot leave the host thread, and creating it binds
/// the queue's consumer side to that thread.
pub struct MainThreadPump {
    queue: Arc<TaskQueue>,
    interval: Duration,
    last_drain: Option<Instant>,
    _host_thread: PhantomData<*const ()>,
}

impl MainThreadPump {
    pub fn new(queue: Arc<TaskQueue>, interval: Duration) -> Result<Self, BridgeError> {
        queue.bind_consumer_thread()?;
        Ok(Self {
            queue,
            interval,
            last_drain: None,
            _host_thread: PhantomData,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Host timer callback. `None` when skipped by the throttle or refused
    /// because a drain is already running, otherwise the number of tasks
    /// attempted. Only a drain that ran restarts the interval.
    pub fn tick(&mut self) -> Option<usize> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Option<usize> {
        if let Some(last) = self.last_drain
            && now.saturating_duration_since(last) < self.interval
        {
            return None;
        }
        let attempted = self.queue.try_drain()?;
        self.last_drain = Some(now);
        if attempted > 0 {
            debug!(attempted, "pump drained tasks");
        }
        Some(attempted)
    }
}

/// Stand-in host: ticks the pump every interval on the current thread until
/// shutdown is signalled.
///
/// Run it with `Runtime::block_on` on the host thread; the future is not
/// `Send` and never moves.
pub struct HostLoop {
    pump: MainThreadPump,
    shutdown: watch::Receiver<bool>,
}

impl HostLoop {
    pub fn new(pump: MainThreadPump, shutdown: watch::Receiver<bool>) -> Self {
        Self { pump, shutdown }
    }

    /// Returns the total number of tasks attempted.
    pub async fn run(mut self) -> usize {
        let mut ticker = tokio::time::interval(self.pump.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.pump.interval().as_millis() as u64, "host loop started");

        let mut total = 0;
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        // sender dropped: nobody can ask us to stop any more
                        break;
                    }
                }
                _ = ticker.tick() => {
                    total += self.pump.tick().unwrap_or(0);
                }
            }
        }

        // Tasks already acknowledged to clients still run.
        let last = self.pump.queue().drain();
        total += last;
        let stranded = self.pump.queue().get_queue_size();
        if stranded > 0 {
            warn!(stranded, "host loop stopped with tasks still queued");
        }
        info!(total, final_drain = last, "host loop stopped");
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorsConfig;
    use crate::domain::TaskRequest;
    use crate::fault::ErrorHandler;
    use crate::ports::SystemClock;
    use serde_json::{Map, Value};
    use std::cell::{Cell, RefCell};
    use std::thread;

    fn queue() -> Arc<TaskQueue> {
        let clock = Arc::new(SystemClock);
        let errors = Arc::new(ErrorHandler::new(&ErrorsConfig::default(), clock.clone()));
        let queue = Arc::new(TaskQueue::new(errors, clock));
        queue.register_handler("noop", |_: &[Value], _: &Map<String, Value>| -> Result<Value, BridgeError> {
            Ok(Value::Null)
        });
        queue
    }

    #[test]
    fn ticks_inside_the_interval_are_skipped() {
        let q = queue();
        let mut pump = MainThreadPump::new(q.clone(), Duration::from_millis(200)).unwrap();
        let t0 = Instant::now();

        q.enqueue(TaskRequest::new("noop"));
        assert_eq!(pump.tick_at(t0), Some(1));

        q.enqueue(TaskRequest::new("noop"));
        assert_eq!(pump.tick_at(t0 + Duration::from_millis(150)), None);
        assert_eq!(q.get_queue_size(), 1);

        assert_eq!(pump.tick_at(t0 + Duration::from_millis(200)), Some(1));
        assert_eq!(pump.tick_at(t0 + Duration::from_millis(450)), Some(0));
    }

    thread_local! {
        static NESTED_PUMP: RefCell<Option<MainThreadPump>> = const { RefCell::new(None) };
        static NESTED_TICK: Cell<Option<Option<usize>>> = const { Cell::new(None) };
    }

    #[test]
    fn refused_drain_does_not_restart_the_interval() {
        let q = queue();
        let t0 = Instant::now();
        NESTED_PUMP.with(|p| {
            *p.borrow_mut() = Some(MainThreadPump::new(q.clone(), Duration::from_millis(200)).unwrap());
        });
        q.register_handler("nested_tick", move |_: &[Value], _: &Map<String, Value>| -> Result<Value, BridgeError> {
            let ticked = NESTED_PUMP.with(|p| p.borrow_mut().as_mut().map(|pump| pump.tick_at(t0)));
            NESTED_TICK.with(|c| c.set(ticked));
            Ok(Value::Null)
        });

        q.enqueue(TaskRequest::new("nested_tick"));
        assert_eq!(q.try_drain(), Some(1));
        assert_eq!(NESTED_TICK.with(Cell::get), Some(None));

        q.enqueue(TaskRequest::new("noop"));
        let mut pump = NESTED_PUMP.with(|p| p.borrow_mut().take()).unwrap();
        assert_eq!(pump.tick_at(t0 + Duration::from_millis(1)), Some(1));
    }

    #[test]
    fn pump_binds_the_queue_to_its_thread() {
        let q = queue();
        let _pump = MainThreadPump::new(q.clone(), Duration::from_millis(10)).unwrap();

        let q2 = q.clone();
        let other = thread::spawn(move || {
            q2.enqueue(TaskRequest::new("noop"));
            let second = MainThreadPump::new(q2.clone(), Duration::from_millis(10));
            (second.is_err(), q2.drain())
        })
        .join()
        .unwrap();

        assert_eq!(other, (true, 0));
        assert_eq!(q.drain(), 1);
    }

    #[tokio::test]
    async fn host_loop_runs_until_shutdown() {
        let q = queue();
        let pump = MainThreadPump::new(q.clone(), Duration::from_millis(5)).unwrap();
        let (tx, rx) = watch::channel(false);

        for _ in 0..3 {
            q.enqueue(TaskRequest::new("noop"));
        }
        let producer = q.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            producer.enqueue(TaskRequest::new("noop"));
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = tx.send(true);
        });

        let total = HostLoop::new(pump, rx).run().await;
        assert_eq!(total, 4);
        assert_eq!(q.get_stats().tasks_processed, 4);
    }
}
