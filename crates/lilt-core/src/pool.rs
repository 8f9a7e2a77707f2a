//! Worker pool for blocking and CPU-bound callables
//!
//! A fixed set of OS threads drains a FIFO work channel so the scheduler's
//! single logical thread is never stalled by a blocking call. Each submission
//! gets a completion slot; the pool fills it exactly once and fires the
//! stored waker, which routes the wake back to the scheduler.

use crate::error::TaskError;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::{Duration, Instant};

/// Callable queued for a pool thread
struct WorkItem {
    job: Box<dyn FnOnce() + Send>,
}

/// Completion slot shared between a pool thread and the awaiting task
struct JobState<T> {
    result: Option<Result<T, TaskError>>,
    waker: Option<Waker>,
}

fn complete_job<T>(state: &Arc<Mutex<JobState<T>>>, result: Result<T, TaskError>) {
    let mut slot = state.lock();
    if slot.result.is_some() {
        return;
    }
    slot.result = Some(result);
    if let Some(waker) = slot.waker.take() {
        waker.wake();
    }
}

/// Extract a readable message from a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Awaitable result of a worker-pool submission.
///
/// Resolves with the callable's return value, or with
/// [`TaskError::Worker`] if the callable panicked on the pool thread.
/// Dropping the job does not stop the callable; its result is discarded.
pub struct Job<T> {
    state: Arc<Mutex<JobState<T>>>,
}

impl<T> Future for Job<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock();
        if let Some(result) = state.result.take() {
            return Poll::Ready(result);
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// Fixed-size pool of OS threads running blocking or CPU-bound callables.
pub struct WorkerPool {
    /// Work queue; unbounded, drained FIFO by the pool threads
    work_tx: Sender<WorkItem>,
    /// Thread handles, taken on shutdown
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    /// Shutdown signal
    shutdown: Arc<AtomicBool>,
    /// Number of pool threads
    size: usize,
}

impl WorkerPool {
    /// Create a pool with the specified number of threads.
    /// If `size` is 0, defaults to the number of CPU cores.
    pub fn new(size: usize) -> Self {
        let size = if size == 0 { num_cpus::get() } else { size };
        let (work_tx, work_rx) = channel::unbounded::<WorkItem>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(size);
        for id in 0..size {
            let rx = work_rx.clone();
            let shutdown = shutdown.clone();
            let handle = thread::Builder::new()
                .name(format!("lilt-worker-{}", id))
                .spawn(move || Self::worker_loop(id, rx, shutdown))
                .expect("Failed to spawn pool worker thread");
            handles.push(handle);
        }

        Self {
            work_tx,
            handles: Mutex::new(handles),
            shutdown,
            size,
        }
    }

    /// Number of pool threads.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Submit a callable for execution on a pool thread.
    ///
    /// The returned [`Job`] resolves once the callable has run. With a free
    /// thread available the callable starts immediately; otherwise it waits
    /// FIFO behind earlier submissions.
    pub fn submit<T, F>(&self, callable: F) -> Job<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let state = Arc::new(Mutex::new(JobState {
            result: None,
            waker: None,
        }));
        let job = Job {
            state: state.clone(),
        };

        if self.shutdown.load(Ordering::Acquire) {
            complete_job(&state, Err(TaskError::worker("worker pool is shut down")));
            return job;
        }

        let slot = state.clone();
        let item = WorkItem {
            job: Box::new(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(callable))
                    .map_err(|payload| TaskError::worker(panic_message(payload.as_ref())));
                complete_job(&slot, outcome);
            }),
        };

        if self.work_tx.send(item).is_err() {
            complete_job(&state, Err(TaskError::worker("worker pool is shut down")));
        }
        job
    }

    /// Pool thread main loop
    fn worker_loop(id: usize, work_rx: Receiver<WorkItem>, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::Acquire) {
            match work_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(item) => {
                    tracing::trace!(worker = id, "running pool callable");
                    (item.job)();
                }
                Err(channel::RecvTimeoutError::Timeout) => continue,
                Err(channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::trace!(worker = id, "pool worker shutting down");
    }

    /// Stop the pool threads. Idempotent; queued work that has not started
    /// is dropped once the threads exit.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let timeout = Duration::from_secs(2);
        for handle in self.handles.lock().drain(..) {
            Self::join_with_timeout(handle, timeout);
        }
    }

    /// Join a pool thread with timeout, detach if stuck on a long callable.
    fn join_with_timeout(handle: thread::JoinHandle<()>, timeout: Duration) {
        let start = Instant::now();
        loop {
            if handle.is_finished() {
                let _ = handle.join();
                return;
            }
            if start.elapsed() > timeout {
                drop(handle);
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
