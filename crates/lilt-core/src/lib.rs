//! Cooperative task scheduler with blocking-call offload
//!
//! A single-threaded run loop interleaves many logical tasks without
//! preemption: tasks suspend at `.await` points on timer delays, worker-pool
//! submissions, or other tasks, and the scheduler resumes them when the
//! awaited condition fires. A fixed pool of OS threads runs blocking and
//! CPU-bound callables so the run loop itself never stalls; it is the only
//! true parallelism in the crate.
//!
//! ```no_run
//! use lilt_core::{gather, Scheduler, TaskError};
//! use std::time::Duration;
//!
//! let mut scheduler = Scheduler::new();
//! let handle = scheduler.handle();
//!
//! let t1 = handle.spawn({
//!     let h = handle.clone();
//!     async move {
//!         h.sleep(Duration::from_secs(2)).await;
//!         Ok("first")
//!     }
//! });
//! let t2 = handle.spawn({
//!     let h = handle.clone();
//!     async move {
//!         h.sleep(Duration::from_secs(3)).await;
//!         Ok("second")
//!     }
//! });
//!
//! // Both tasks make progress concurrently; total wall clock is about
//! // the longer delay, not the sum.
//! let root = handle.spawn(async move { gather(vec![t1, t2]).await });
//! let names = scheduler.run_until_complete(root)?;
//! assert_eq!(names, vec!["first", "second"]);
//! # Ok::<(), TaskError>(())
//! ```

mod error;
mod gather;
mod pool;
mod scheduler;
mod task;
mod timer;

pub use error::TaskError;
pub use gather::{gather, Gather};
pub use pool::{Job, WorkerPool};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerStats};
pub use task::{JoinHandle, TaskId, TaskState};
pub use timer::Sleep;
