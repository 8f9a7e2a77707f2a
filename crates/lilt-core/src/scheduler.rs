//! Cooperative scheduler run loop
//!
//! A single logical thread drives every task resumption: the run loop drains
//! newly spawned tasks, fires due timers, and polls ready tasks until the
//! root task finishes. Pool threads and timer fires communicate with the
//! loop only through the wake channel, so task state is never touched off
//! the scheduler thread.

use crate::error::TaskError;
use crate::pool::{Job, WorkerPool};
use crate::task::{JoinHandle, JoinSlot, Task, TaskId, TaskState, TaskWaker};
use crate::timer::{Sleep, TimerQueue};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How long to park when no timer bounds the wait
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Total tasks spawned
    pub tasks_spawned: u64,

    /// Total tasks that finished (completed, failed, or cancelled)
    pub tasks_completed: u64,

    /// Tasks currently alive on the scheduler
    pub active_tasks: usize,
}

/// State shared between the scheduler and its handles.
struct Shared {
    /// Pending timed wakes, owned by the run loop
    timers: Arc<TimerQueue>,

    /// Pool threads for blocking and CPU-bound callables
    pool: WorkerPool,

    /// Producer side of the wake channel; cloned into every task waker
    wake_tx: Sender<TaskId>,

    /// Newly spawned tasks, picked up by the run loop before each pass
    injector: Mutex<VecDeque<Task>>,

    /// Total spawn count
    tasks_spawned: AtomicU64,
}

/// Cheap handle for spawning tasks and creating awaitables.
///
/// The handle is the explicit stand-in for an ambient event loop: task logic
/// receives one and goes through it for every suspension point.
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl Clone for SchedulerHandle {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl SchedulerHandle {
    /// Register a new task. The task starts in the ready queue and is first
    /// polled by a later run-loop pass, never inline with the spawn.
    pub fn spawn<T, F>(&self, future: F) -> JoinHandle<T>
    where
        F: Future<Output = Result<T, TaskError>> + 'static,
        T: 'static,
    {
        let id = TaskId::new();
        let slot = JoinSlot::new();
        let cancelled = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));

        let wrapper_slot = slot.clone();
        let wrapper_failed = failed.clone();
        let wrapped = Box::pin(async move {
            let out = future.await;
            if out.is_err() {
                wrapper_failed.store(true, Ordering::Release);
            }
            wrapper_slot.complete(out);
        });

        let task = Task::new(id, wrapped, cancelled.clone(), failed);
        self.shared.tasks_spawned.fetch_add(1, Ordering::Relaxed);
        self.shared.injector.lock().push_back(task);
        trace!(task = id.as_u64(), "task spawned");

        JoinHandle::new(id, slot, cancelled)
    }

    /// Awaitable delay. The calling task suspends and is resumed by the run
    /// loop once the delay has elapsed, never earlier.
    pub fn sleep(&self, delay: Duration) -> Sleep {
        Sleep::new(self.shared.timers.clone(), delay)
    }

    /// Offload a blocking or CPU-bound callable to the worker pool. The
    /// calling task suspends on the returned [`Job`] while the scheduler
    /// keeps resuming other tasks.
    pub fn submit<T, F>(&self, callable: F) -> Job<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.shared.pool.submit(callable)
    }

    /// Number of worker-pool threads.
    pub fn pool_size(&self) -> usize {
        self.shared.pool.size()
    }
}

/// Single-threaded cooperative scheduler.
///
/// Owns the task registry, the timer queue, and the worker pool. Tasks are
/// interleaved without preemption: each runs until it completes, fails, or
/// suspends on an awaitable.
pub struct Scheduler {
    shared: Arc<Shared>,

    /// Consumer side of the wake channel
    wake_rx: Receiver<TaskId>,

    /// Live tasks by id
    tasks: FxHashMap<TaskId, Task>,

    /// Runnable tasks in FIFO resumption order
    ready: VecDeque<TaskId>,

    /// Total finished tasks
    tasks_completed: u64,
}

impl Scheduler {
    /// Create a scheduler with a worker pool sized to the host parallelism.
    pub fn new() -> Self {
        Self::with_workers(0)
    }

    /// Create a scheduler with the specified number of pool threads.
    /// If `worker_count` is 0, defaults to the number of CPU cores.
    pub fn with_workers(worker_count: usize) -> Self {
        let (wake_tx, wake_rx) = channel::unbounded();
        let shared = Arc::new(Shared {
            timers: Arc::new(TimerQueue::new()),
            pool: WorkerPool::new(worker_count),
            wake_tx,
            injector: Mutex::new(VecDeque::new()),
            tasks_spawned: AtomicU64::new(0),
        });

        Self {
            shared,
            wake_rx,
            tasks: FxHashMap::default(),
            ready: VecDeque::new(),
            tasks_completed: 0,
        }
    }

    /// Get a handle for spawning tasks and creating awaitables.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: self.shared.clone(),
        }
    }

    /// Number of worker-pool threads.
    pub fn worker_count(&self) -> usize {
        self.shared.pool.size()
    }

    /// Number of live tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len() + self.shared.injector.lock().len()
    }

    /// Get scheduler statistics.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            tasks_spawned: self.shared.tasks_spawned.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed,
            active_tasks: self.task_count(),
        }
    }

    /// Drive the run loop until the root task completes or fails,
    /// propagating its result to the caller.
    ///
    /// Other live tasks are left suspended in the registry when the root
    /// finishes; a later call can pick a new root and keep driving them.
    pub fn run_until_complete<T>(&mut self, root: JoinHandle<T>) -> Result<T, TaskError> {
        loop {
            self.ingest_spawned();
            self.fire_due_timers();
            self.drain_wakes();

            if let Some(id) = self.ready.pop_front() {
                self.poll_task(id);
                if let Some(result) = root.take_result() {
                    return self.finish_root(result);
                }
                continue;
            }

            if let Some(result) = root.take_result() {
                return self.finish_root(result);
            }
            self.park();
        }
    }

    fn finish_root<T>(&self, result: Result<T, TaskError>) -> Result<T, TaskError> {
        if let Err(ref failure) = result {
            debug!(%failure, "root task failed");
        }
        result
    }

    /// Move newly spawned tasks into the registry and the ready queue.
    fn ingest_spawned(&mut self) {
        let spawned = std::mem::take(&mut *self.shared.injector.lock());
        for task in spawned {
            let id = task.id();
            self.tasks.insert(id, task);
            self.ready.push_back(id);
        }
    }

    /// Fire every timer entry that is due, earliest wake time first and
    /// insertion order among ties. The wakes land on the wake channel and
    /// are drained right after, preserving FIFO resumption.
    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.shared.timers.pop_due(now) {
            entry.fire();
        }
    }

    /// Pull queued wakes into the ready queue.
    fn drain_wakes(&mut self) {
        while let Ok(id) = self.wake_rx.try_recv() {
            self.wake_task(id);
        }
    }

    /// Mark a suspended task runnable. Wakes for tasks that are already
    /// queued, running, or gone are coalesced or dropped, so a task is
    /// resumed at most once per suspension.
    fn wake_task(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(&id) else {
            trace!(task = id.as_u64(), "wake for finished task ignored");
            return;
        };
        if task.state() == TaskState::Suspended {
            task.set_state(TaskState::Pending);
            self.ready.push_back(id);
        }
    }

    /// Resume one task: poll its continuation until it yields or finishes.
    fn poll_task(&mut self, id: TaskId) {
        let Some(mut task) = self.tasks.remove(&id) else {
            return;
        };

        if task.is_cancelled() {
            task.set_state(TaskState::Failed);
            self.tasks_completed += 1;
            debug!(task = id.as_u64(), "task cancelled");
            return;
        }

        task.set_state(TaskState::Running);
        let waker = TaskWaker::waker(id, self.shared.wake_tx.clone());
        let mut cx = Context::from_waker(&waker);

        match task.poll(&mut cx) {
            Poll::Ready(()) => {
                let state = if task.has_failed() {
                    TaskState::Failed
                } else {
                    TaskState::Completed
                };
                task.set_state(state);
                self.tasks_completed += 1;
                debug!(task = id.as_u64(), ?state, "task finished");
            }
            Poll::Pending => {
                task.set_state(TaskState::Suspended);
                self.tasks.insert(id, task);
            }
        }
    }

    /// Block until the next event: a wake arriving on the channel or the
    /// earliest timer deadline passing.
    fn park(&mut self) {
        let timeout = self
            .shared
            .timers
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_WAIT);
        if timeout.is_zero() {
            return;
        }
        match self.wake_rx.recv_timeout(timeout) {
            Ok(id) => self.wake_task(id),
            Err(channel::RecvTimeoutError::Timeout) => {}
            Err(channel::RecvTimeoutError::Disconnected) => {}
        }
    }

    /// Shut down the worker pool and drop all live tasks.
    pub fn shutdown(&mut self) {
        self.shared.pool.shutdown();
        trace!(
            dropped_tasks = self.tasks.len(),
            pending_timers = self.shared.timers.pending_count(),
            "scheduler shut down"
        );
        self.tasks.clear();
        self.ready.clear();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
