//! The reactive executor: a cooperative, lane-based scheduler.
//!
//! Continuation dispatch runs through this executor so that chained steps
//! advance without growing the native stack (the trampoline) and without
//! blocking a worker unless a step is known to block.
//!
//! A *lane* is the thread-local FIFO queue of the thread currently
//! driving an exchange's pipeline. `schedule_main` keeps chain ordering
//! local to one lane; `schedule` starts independent work on the pool;
//! `schedule_sync` moves known-blocking work onto the blocking pool;
//! `execute_from_queue` lets an external event loop pump the lane itself.

mod task;

pub use task::Task;
pub(crate) use task::{panic_message, run_isolated};

use dashmap::DashMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};

thread_local! {
    static LANE: RefCell<Lane> = RefCell::new(Lane::default());
}

#[derive(Default)]
struct Lane {
    queue: VecDeque<Task>,
    pumping: bool,
}

/// Handle to a scheduled, cancellable timer task.
#[derive(Debug)]
pub struct ScheduledTask {
    id: u64,
    timers: Weak<DashMap<u64, tokio::task::JoinHandle<()>>>,
}

impl ScheduledTask {
    /// Cancels the timer if it has not fired yet.
    pub fn cancel(&self) {
        if let Some(timers) = self.timers.upgrade() {
            if let Some((_, handle)) = timers.remove(&self.id) {
                handle.abort();
            }
        }
    }

    /// Returns true if the timer is still pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.timers
            .upgrade()
            .is_some_and(|timers| timers.contains_key(&self.id))
    }
}

/// The cooperative scheduler driving continuations across lanes.
pub struct ReactiveExecutor {
    handle: Handle,
    // Keeps the runtime alive when the executor owns it.
    _runtime: Option<Runtime>,
    timers: Arc<DashMap<u64, tokio::task::JoinHandle<()>>>,
    timer_seq: AtomicU64,
}

impl ReactiveExecutor {
    /// Creates an executor owning a multi-threaded worker pool.
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .thread_name("courier-worker")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            _runtime: Some(runtime),
            timers: Arc::new(DashMap::new()),
            timer_seq: AtomicU64::new(0),
        })
    }

    /// Creates an executor borrowing an existing runtime.
    #[must_use]
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            _runtime: None,
            timers: Arc::new(DashMap::new()),
            timer_seq: AtomicU64::new(0),
        }
    }

    /// Enqueues the next step of a chain onto the current lane.
    ///
    /// Submission order is preserved per lane. If the lane is not already
    /// being pumped, this call pumps it to completion before returning,
    /// so fully synchronous chains finish inline with O(1) stack depth.
    pub fn schedule_main(&self, task: Task) {
        let pump_now = LANE.with(|lane| {
            let mut lane = lane.borrow_mut();
            lane.queue.push_back(task);
            !lane.pumping
        });
        if pump_now {
            Self::pump();
        }
    }

    /// Starts independent new work on the worker pool.
    ///
    /// The task becomes the root of its own lane on whichever worker
    /// thread picks it up.
    pub fn schedule(&self, task: Task) {
        self.handle.spawn(async move {
            run_isolated(task);
        });
    }

    /// Runs known-blocking work off the cooperative lanes, on the
    /// blocking pool, so other lanes keep making progress.
    pub fn schedule_sync(&self, task: Task) {
        self.handle.spawn_blocking(move || {
            run_isolated(task);
        });
    }

    /// Pops and runs one queued task from the current lane, if any.
    ///
    /// For drivers that pump the queue themselves, e.g. when embedded in
    /// an external event loop. Returns whether work was found.
    pub fn execute_from_queue(&self) -> bool {
        let next = LANE.with(|lane| lane.borrow_mut().queue.pop_front());
        match next {
            Some(task) => {
                run_isolated(task);
                true
            }
            None => false,
        }
    }

    /// Number of tasks queued on the current lane.
    #[must_use]
    pub fn queued_on_lane(&self) -> usize {
        LANE.with(|lane| lane.borrow().queue.len())
    }

    /// Runs `task` after `delay` on the worker pool, as a cancellable
    /// timer. Used for redelivery waits and resequencer timeouts; never
    /// busy-polls.
    pub fn schedule_delayed(self: &Arc<Self>, task: Task, delay: Duration) -> ScheduledTask {
        self.timers.retain(|_, handle| !handle.is_finished());

        let id = self.timer_seq.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        let handle = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            timers.remove(&id);
            run_isolated(task);
        });
        self.timers.insert(id, handle);
        ScheduledTask {
            id,
            timers: Arc::downgrade(&self.timers),
        }
    }

    /// Cancels all pending timers.
    pub fn cancel_timers(&self) {
        self.timers.retain(|_, handle| {
            handle.abort();
            false
        });
    }

    fn pump() {
        LANE.with(|lane| lane.borrow_mut().pumping = true);
        loop {
            let next = LANE.with(|lane| lane.borrow_mut().queue.pop_front());
            match next {
                Some(task) => run_isolated(task),
                None => break,
            }
        }
        LANE.with(|lane| lane.borrow_mut().pumping = false);
    }
}

impl std::fmt::Debug for ReactiveExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveExecutor")
            .field("owns_runtime", &self._runtime.is_some())
            .field("pending_timers", &self.timers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Instant;

    fn executor() -> Arc<ReactiveExecutor> {
        Arc::new(ReactiveExecutor::new().expect("executor starts"))
    }

    #[test]
    fn test_schedule_main_runs_inline_when_not_pumping() {
        let executor = executor();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        executor.schedule_main(Task::new("inline", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        // Pumped before returning.
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_schedule_main_preserves_lane_order() {
        let executor = executor();
        let order = Arc::new(Mutex::new(Vec::new()));

        let (outer_order, exec) = (order.clone(), executor.clone());
        executor.schedule_main(Task::new("outer", move || {
            outer_order.lock().push("a");
            // Scheduled from within a pump: enqueued, not recursed into.
            let first = order_pusher(&outer_order, "b");
            let second = order_pusher(&outer_order, "c");
            exec.schedule_main(first);
            exec.schedule_main(second);
            outer_order.lock().push("a-end");
        }));

        assert_eq!(order.lock().clone(), vec!["a", "a-end", "b", "c"]);
    }

    fn order_pusher(order: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Task {
        let order = order.clone();
        Task::new("pusher", move || order.lock().push(tag))
    }

    #[test]
    fn test_execute_from_queue_manual_pump() {
        let executor = executor();
        let ran = Arc::new(AtomicUsize::new(0));

        // Fill the lane without pumping by enqueueing from inside a pump
        // that drains via execute_from_queue afterwards.
        let (counter, exec) = (ran.clone(), executor.clone());
        executor.schedule_main(Task::new("filler", move || {
            for _ in 0..3 {
                let c = counter.clone();
                exec.schedule_main(Task::new("queued", move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }));
            }
            assert_eq!(exec.queued_on_lane(), 3);
            assert!(exec.execute_from_queue());
            assert_eq!(c_count(&counter), 1);
        }));

        // Remaining two drained by the surrounding pump.
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert!(!executor.execute_from_queue());
    }

    fn c_count(counter: &Arc<AtomicUsize>) -> usize {
        counter.load(Ordering::SeqCst)
    }

    #[test]
    fn test_schedule_runs_on_pool() {
        let executor = executor();
        let (tx, rx) = mpsc::channel();
        executor.schedule(Task::new("pool", move || {
            let _ = tx.send(std::thread::current().name().map(String::from));
        }));
        let name = rx.recv_timeout(Duration::from_secs(5)).expect("ran");
        assert_eq!(name.as_deref(), Some("courier-worker"));
    }

    #[test]
    fn test_schedule_sync_runs_on_blocking_pool() {
        let executor = executor();
        let (tx, rx) = mpsc::channel();
        executor.schedule_sync(Task::new("blocking", move || {
            std::thread::sleep(Duration::from_millis(10));
            let _ = tx.send(());
        }));
        rx.recv_timeout(Duration::from_secs(5)).expect("ran");
    }

    #[test]
    fn test_panic_does_not_kill_pump() {
        let executor = executor();
        let ran = Arc::new(AtomicUsize::new(0));

        let (counter, exec) = (ran.clone(), executor.clone());
        executor.schedule_main(Task::new("root", move || {
            exec.schedule_main(Task::new("boom", || panic!("task panic")));
            let c = counter.clone();
            exec.schedule_main(Task::new("survivor", move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        // The survivor still ran after the panicking task.
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_schedule_delayed_fires_after_delay() {
        let executor = executor();
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();
        executor.schedule_delayed(
            Task::new("timer", move || {
                let _ = tx.send(());
            }),
            Duration::from_millis(50),
        );
        rx.recv_timeout(Duration::from_secs(5)).expect("fired");
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn test_schedule_delayed_cancel() {
        let executor = executor();
        let (tx, rx) = mpsc::channel::<()>();
        let timer = executor.schedule_delayed(
            Task::new("timer", move || {
                let _ = tx.send(());
            }),
            Duration::from_millis(100),
        );
        assert!(timer.is_pending());
        timer.cancel();
        assert!(!timer.is_pending());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
