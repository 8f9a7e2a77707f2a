//! Timer queue for timed wake-ups
//!
//! Pending wakes live in a min-heap keyed on wake time; ties are broken by
//! insertion order so that simultaneously-due timers fire FIFO. The run loop
//! pops due entries lazily and parks no longer than the next deadline.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Entry in the timer heap
pub(crate) struct TimerEntry {
    /// When to fire
    wake_at: Instant,
    /// Insertion counter, breaks ties among equal wake times
    seq: u64,
    /// Waker to fire once due
    waker: Waker,
}

impl TimerEntry {
    /// Fire the wake-up. The entry has already been removed from the queue,
    /// so the corresponding task can be resumed at most once for it.
    pub(crate) fn fire(self) {
        self.waker.wake();
    }
}

// Reverse ordering for min-heap (earliest wake time first, then lowest seq)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .wake_at
            .cmp(&self.wake_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.wake_at == other.wake_at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

struct TimerState {
    /// Pending wakes, sorted by wake time then insertion order (min-heap)
    pending: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

/// Queue of pending timed wake requests, owned by the scheduler.
pub(crate) struct TimerQueue {
    state: Mutex<TimerState>,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TimerState {
                pending: BinaryHeap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Register a wake-up at `now + delay`. Returns the absolute wake time.
    pub(crate) fn schedule(&self, delay: Duration, waker: Waker) -> Instant {
        let wake_at = Instant::now() + delay;
        self.schedule_at(wake_at, waker);
        wake_at
    }

    /// Register a wake-up at an absolute instant.
    pub(crate) fn schedule_at(&self, wake_at: Instant, waker: Waker) {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(TimerEntry { wake_at, seq, waker });
    }

    /// Remove and return the next entry due at `now`, if any.
    ///
    /// Calling in a loop drains all due entries, earliest wake time first and
    /// insertion order among equal wake times.
    pub(crate) fn pop_due(&self, now: Instant) -> Option<TimerEntry> {
        let mut state = self.state.lock();
        if let Some(entry) = state.pending.peek() {
            if entry.wake_at <= now {
                return state.pending.pop();
            }
        }
        None
    }

    /// Earliest pending wake time, used as the park deadline.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.state.lock().pending.peek().map(|entry| entry.wake_at)
    }

    /// Number of pending entries.
    pub(crate) fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

/// Awaitable delay created by [`SchedulerHandle::sleep`].
///
/// The deadline is anchored at the first poll, i.e. when the task actually
/// starts awaiting, and the future never resolves before it has passed.
///
/// [`SchedulerHandle::sleep`]: crate::SchedulerHandle::sleep
pub struct Sleep {
    timers: Arc<TimerQueue>,
    delay: Duration,
    deadline: Option<Instant>,
}

impl Sleep {
    pub(crate) fn new(timers: Arc<TimerQueue>, delay: Duration) -> Self {
        Self {
            timers,
            delay,
            deadline: None,
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let now = Instant::now();
        match this.deadline {
            Some(deadline) if now >= deadline => Poll::Ready(()),
            Some(deadline) => {
                // Re-register: a spurious wake before the deadline parks the
                // task again instead of resolving early.
                this.timers.schedule_at(deadline, cx.waker().clone());
                Poll::Pending
            }
            None if this.delay.is_zero() => {
                this.deadline = Some(now);
                Poll::Ready(())
            }
            None => {
                this.deadline = Some(this.timers.schedule(this.delay, cx.waker().clone()));
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskId, TaskWaker};
    use crossbeam::channel::{self, Receiver};

    fn channel_waker() -> (Waker, Receiver<TaskId>, TaskId) {
        let (tx, rx) = channel::unbounded();
        let id = TaskId::new();
        (TaskWaker::waker(id, tx), rx, id)
    }

    #[test]
    fn test_pop_due_earliest_first() {
        let queue = TimerQueue::new();
        let now = Instant::now();
        let (w1, rx1, id1) = channel_waker();
        let (w2, rx2, id2) = channel_waker();
        let (w3, _rx3, _) = channel_waker();

        queue.schedule_at(now + Duration::from_millis(30), w3);
        queue.schedule_at(now + Duration::from_millis(10), w1);
        queue.schedule_at(now + Duration::from_millis(20), w2);

        let later = now + Duration::from_millis(25);
        queue.pop_due(later).unwrap().fire();
        queue.pop_due(later).unwrap().fire();
        // The 30ms entry is not yet due.
        assert!(queue.pop_due(later).is_none());
        assert_eq!(queue.pending_count(), 1);

        assert_eq!(rx1.try_recv().unwrap(), id1);
        assert_eq!(rx2.try_recv().unwrap(), id2);
    }

    #[test]
    fn test_equal_wake_times_fire_in_insertion_order() {
        let queue = TimerQueue::new();
        let wake_at = Instant::now() + Duration::from_millis(5);
        let mut expected = Vec::new();
        let (tx, rx) = channel::unbounded();

        for _ in 0..4 {
            let id = TaskId::new();
            expected.push(id);
            queue.schedule_at(wake_at, TaskWaker::waker(id, tx.clone()));
        }

        while let Some(entry) = queue.pop_due(wake_at) {
            entry.fire();
        }

        let fired: Vec<TaskId> = rx.try_iter().collect();
        assert_eq!(fired, expected);
    }

    #[test]
    fn test_next_deadline_tracks_earliest() {
        let queue = TimerQueue::new();
        assert!(queue.next_deadline().is_none());

        let now = Instant::now();
        let (w1, _rx1, _) = channel_waker();
        let (w2, _rx2, _) = channel_waker();
        queue.schedule_at(now + Duration::from_secs(10), w1);
        queue.schedule_at(now + Duration::from_secs(2), w2);

        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(2)));
    }

    #[test]
    fn test_schedule_returns_future_wake_time() {
        let queue = TimerQueue::new();
        let (waker, _rx, _) = channel_waker();
        let before = Instant::now();
        let wake_at = queue.schedule(Duration::from_millis(50), waker);
        assert!(wake_at >= before + Duration::from_millis(50));
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn test_zero_delay_sleep_is_immediately_ready() {
        let timers = Arc::new(TimerQueue::new());
        let mut sleep = Sleep::new(timers.clone(), Duration::ZERO);
        let (waker, _rx, _) = channel_waker();
        let mut cx = Context::from_waker(&waker);

        assert!(Pin::new(&mut sleep).poll(&mut cx).is_ready());
        assert_eq!(timers.pending_count(), 0);
    }

    #[test]
    fn test_sleep_registers_and_stays_pending_before_deadline() {
        let timers = Arc::new(TimerQueue::new());
        let mut sleep = Sleep::new(timers.clone(), Duration::from_secs(60));
        let (waker, _rx, _) = channel_waker();
        let mut cx = Context::from_waker(&waker);

        assert!(Pin::new(&mut sleep).poll(&mut cx).is_pending());
        assert_eq!(timers.pending_count(), 1);

        // A spurious poll before the deadline re-registers rather than resolves.
        assert!(Pin::new(&mut sleep).poll(&mut cx).is_pending());
        assert_eq!(timers.pending_count(), 2);
    }
}
