//! Task structure, completion slots, and join handles
//!
//! A task is a resumable unit of sequential logic. Its continuation is the
//! compiler-generated state machine behind an `async` block, boxed and owned
//! exclusively by the scheduler. The typed result travels through a
//! `JoinSlot` shared between the task wrapper and its `JoinHandle`.

use crate::error::TaskError;
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Runnable: newly spawned or woken, queued for the run loop
    Pending,
    /// Currently being polled by the scheduler
    Running,
    /// Parked on an awaitable (timer or worker-pool submission)
    Suspended,
    /// Completed with a result
    Completed,
    /// Failed with an error
    Failed,
}

/// Waker that routes wake-ups through the scheduler's wake channel.
///
/// Pool threads and timer fires never touch task state directly; they send
/// the task id over the channel and the run loop resumes the task on its
/// own thread.
pub(crate) struct TaskWaker {
    id: TaskId,
    wake_tx: Sender<TaskId>,
}

impl TaskWaker {
    pub(crate) fn waker(id: TaskId, wake_tx: Sender<TaskId>) -> Waker {
        Waker::from(Arc::new(TaskWaker { id, wake_tx }))
    }
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        // Send failure means the scheduler is gone; the wake is moot.
        let _ = self.wake_tx.send(self.id);
    }
}

/// Shared completion state between a task wrapper and its `JoinHandle`.
struct JoinState<T> {
    result: Option<Result<T, TaskError>>,
    finished: bool,
    waker: Option<Waker>,
}

/// Handle side of a task's completion slot.
///
/// The slot is filled exactly once: either by the task's own wrapper future
/// or by `JoinHandle::cancel`, whichever runs first.
pub(crate) struct JoinSlot<T> {
    inner: Arc<Mutex<JoinState<T>>>,
}

impl<T> Clone for JoinSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> JoinSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(JoinState {
                result: None,
                finished: false,
                waker: None,
            })),
        }
    }

    /// Fill the slot and wake the awaiter. No-op if already filled.
    pub(crate) fn complete(&self, out: Result<T, TaskError>) {
        let mut state = self.inner.lock();
        if state.finished {
            return;
        }
        state.finished = true;
        state.result = Some(out);
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    /// Take the result if the slot has been filled.
    pub(crate) fn take_result(&self) -> Option<Result<T, TaskError>> {
        self.inner.lock().result.take()
    }

    fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Result<T, TaskError>> {
        let mut state = self.inner.lock();
        if let Some(result) = state.result.take() {
            return Poll::Ready(result);
        }
        if state.finished {
            // The result was already handed out once; a handle yields it
            // exactly once.
            return Poll::Pending;
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// Awaitable completion of a spawned task.
///
/// Resolves to the task's `Result` when awaited from another task. Dropping
/// the handle detaches the task; it keeps running on the scheduler.
pub struct JoinHandle<T> {
    id: TaskId,
    slot: JoinSlot<T>,
    cancelled: Arc<AtomicBool>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(id: TaskId, slot: JoinSlot<T>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            id,
            slot,
            cancelled,
        }
    }

    /// The id of the task this handle refers to.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Whether the task has completed or failed.
    pub fn is_finished(&self) -> bool {
        self.slot.is_finished()
    }

    /// Cancel the task.
    ///
    /// Awaiters observe [`TaskError::Cancelled`] immediately. The task is
    /// marked failed and never polled again; a pending timer entry for it is
    /// discarded when it fires.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.slot.complete(Err(TaskError::Cancelled));
    }

    pub(crate) fn take_result(&self) -> Option<Result<T, TaskError>> {
        self.slot.take_result()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.slot.poll_take(cx)
    }
}

/// A cooperatively scheduled task owned by the run loop.
pub(crate) struct Task {
    id: TaskId,
    state: TaskState,
    future: Pin<Box<dyn Future<Output = ()> + 'static>>,
    cancelled: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        future: Pin<Box<dyn Future<Output = ()> + 'static>>,
        cancelled: Arc<AtomicBool>,
        failed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            state: TaskState::Pending,
            future,
            cancelled,
            failed,
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn state(&self) -> TaskState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether the task's logic resolved to an error (set by the wrapper
    /// future before the final poll returns).
    pub(crate) fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Resume the continuation until it yields or finishes.
    pub(crate) fn poll(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        self.future.as_mut().poll(cx)
    }
}
