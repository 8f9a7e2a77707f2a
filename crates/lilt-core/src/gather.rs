//! Await-all composition over tasks and pool submissions
//!
//! `gather` suspends the calling task until every listed awaitable has
//! completed or failed. The first observed failure surfaces immediately;
//! siblings that are still running are left to finish on their own.

use crate::error::TaskError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::warn;

/// Await the completion of every future in `children`.
///
/// Resolves to `Ok` with the results in listed order once all children
/// succeed. If any child fails, the gather resolves with that failure
/// wrapped in [`TaskError::Gather`] as soon as it is observed; children that
/// have not finished yet are dropped detached, never force-cancelled, so
/// spawned siblings run to completion on the scheduler. Additional failures
/// observed in the same pass are logged rather than suppressed.
pub fn gather<T, F>(children: Vec<F>) -> Gather<T, F>
where
    F: Future<Output = Result<T, TaskError>> + Unpin,
    T: Unpin,
{
    let remaining = children.len();
    Gather {
        results: (0..remaining).map(|_| None).collect(),
        children: children.into_iter().map(Some).collect(),
        remaining,
    }
}

/// Future returned by [`gather`].
pub struct Gather<T, F> {
    /// Children still in flight; a slot is cleared once its child resolves
    children: Vec<Option<F>>,
    /// Results of resolved children, in listed order
    results: Vec<Option<T>>,
    remaining: usize,
}

impl<T, F> Future for Gather<T, F>
where
    F: Future<Output = Result<T, TaskError>> + Unpin,
    T: Unpin,
{
    type Output = Result<Vec<T>, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut first_failure: Option<TaskError> = None;

        for index in 0..this.children.len() {
            let Some(child) = this.children[index].as_mut() else {
                continue;
            };
            match Pin::new(child).poll(cx) {
                Poll::Ready(Ok(value)) => {
                    this.children[index] = None;
                    this.results[index] = Some(value);
                    this.remaining -= 1;
                }
                Poll::Ready(Err(failure)) => {
                    this.children[index] = None;
                    this.remaining -= 1;
                    if first_failure.is_none() {
                        first_failure = Some(failure);
                    } else {
                        warn!(child = index, %failure, "additional gathered task failed");
                    }
                }
                Poll::Pending => {}
            }
        }

        if let Some(failure) = first_failure {
            return Poll::Ready(Err(TaskError::Gather(Box::new(failure))));
        }
        if this.remaining == 0 {
            let mut values = Vec::with_capacity(this.results.len());
            for slot in &mut this.results {
                if let Some(value) = slot.take() {
                    values.push(value);
                }
            }
            return Poll::Ready(Ok(values));
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskId, TaskWaker};
    use crossbeam::channel;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Test future that resolves once its flag is raised.
    struct Flagged {
        ready: Arc<AtomicBool>,
        value: Option<Result<i32, TaskError>>,
    }

    impl Flagged {
        fn ready(value: Result<i32, TaskError>) -> Self {
            Self {
                ready: Arc::new(AtomicBool::new(true)),
                value: Some(value),
            }
        }

        fn pending(value: Result<i32, TaskError>) -> (Self, Arc<AtomicBool>) {
            let ready = Arc::new(AtomicBool::new(false));
            (
                Self {
                    ready: ready.clone(),
                    value: Some(value),
                },
                ready,
            )
        }
    }

    impl Future for Flagged {
        type Output = Result<i32, TaskError>;

        fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
            let this = self.get_mut();
            if this.ready.load(Ordering::Acquire) {
                Poll::Ready(this.value.take().unwrap())
            } else {
                Poll::Pending
            }
        }
    }

    fn test_context() -> (std::task::Waker, channel::Receiver<TaskId>) {
        let (tx, rx) = channel::unbounded();
        (TaskWaker::waker(TaskId::new(), tx), rx)
    }

    #[test]
    fn test_gather_preserves_listed_order() {
        let (waker, _rx) = test_context();
        let mut cx = Context::from_waker(&waker);
        let mut g = gather(vec![
            Flagged::ready(Ok(1)),
            Flagged::ready(Ok(2)),
            Flagged::ready(Ok(3)),
        ]);

        match Pin::new(&mut g).poll(&mut cx) {
            Poll::Ready(Ok(values)) => assert_eq!(values, vec![1, 2, 3]),
            _ => panic!("expected all children ready"),
        }
    }

    #[test]
    fn test_gather_empty_resolves_immediately() {
        let (waker, _rx) = test_context();
        let mut cx = Context::from_waker(&waker);
        let mut g: Gather<i32, Flagged> = gather(vec![]);
        assert!(matches!(
            Pin::new(&mut g).poll(&mut cx),
            Poll::Ready(Ok(values)) if values.is_empty()
        ));
    }

    #[test]
    fn test_gather_waits_for_all_children() {
        let (waker, _rx) = test_context();
        let mut cx = Context::from_waker(&waker);
        let (slow, flag) = Flagged::pending(Ok(2));
        let mut g = gather(vec![Flagged::ready(Ok(1)), slow]);

        assert!(Pin::new(&mut g).poll(&mut cx).is_pending());

        flag.store(true, Ordering::Release);
        match Pin::new(&mut g).poll(&mut cx) {
            Poll::Ready(Ok(values)) => assert_eq!(values, vec![1, 2]),
            _ => panic!("expected ready after flag"),
        }
    }

    #[test]
    fn test_gather_surfaces_failure_before_siblings_finish() {
        let (waker, _rx) = test_context();
        let mut cx = Context::from_waker(&waker);
        let (never_done, _flag) = Flagged::pending(Ok(1));
        let mut g = gather(vec![never_done, Flagged::ready(Err(TaskError::worker("boom")))]);

        match Pin::new(&mut g).poll(&mut cx) {
            Poll::Ready(Err(TaskError::Gather(inner))) => {
                assert!(inner.to_string().contains("boom"));
            }
            _ => panic!("expected gather failure"),
        }
    }

    #[test]
    fn test_gather_reports_first_of_several_failures() {
        let (waker, _rx) = test_context();
        let mut cx = Context::from_waker(&waker);
        let mut g = gather(vec![
            Flagged::ready(Err(TaskError::worker("first"))),
            Flagged::ready(Err(TaskError::worker("second"))),
        ]);

        match Pin::new(&mut g).poll(&mut cx) {
            Poll::Ready(Err(TaskError::Gather(inner))) => {
                assert!(inner.to_string().contains("first"));
            }
            _ => panic!("expected gather failure"),
        }
    }
}
