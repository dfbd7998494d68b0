//! The live task result counters shared between the task tracker and the statistics jobs.
//!
//! The tracker writes through [`SharedCounters::task_started`], [`SharedCounters::task_succeeded`]
//! and [`SharedCounters::task_failed`]. The statistics jobs take coherent snapshots with
//! [`SharedCounters::snapshot`], and a job configured with
//! [`crate::job::ResetPolicy::PerInterval`] drains what it flushed with
//! [`SharedCounters::drain`].
//!
//! # Example
//!
//! ```
//! use runstat::counters::{SharedCounters, TaskResultCounts};
//!
//! let counters = SharedCounters::new();
//! let tracker = counters.clone();
//!
//! tracker.task_started();
//! tracker.task_started();
//! tracker.task_succeeded();
//!
//! assert_eq!(
//!     counters.snapshot(),
//!     TaskResultCounts { running: 1, success: 1, failed: 0 }
//! );
//! ```
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// A point in time reading of the counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskResultCounts {
    /// Tasks currently running. This is a gauge and is never drained.
    pub running: u64,
    /// Tasks that completed successfully.
    pub success: u64,
    /// Tasks that failed.
    pub failed: u64,
}

/// A cloneable handle to the process wide counters.
///
/// All clones observe the same counters. Every read and write takes a single lock so a snapshot
/// never mixes fields from before and after an update.
#[derive(Debug, Clone, Default)]
pub struct SharedCounters {
    inner: Arc<Mutex<TaskResultCounts>>,
}

impl SharedCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing counts, for example counts restored after a restart.
    pub fn with_counts(counts: TaskResultCounts) -> Self {
        Self {
            inner: Arc::new(Mutex::new(counts)),
        }
    }

    // A panic while holding the lock cannot leave the counts half written.
    fn lock(&self) -> MutexGuard<'_, TaskResultCounts> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn task_started(&self) {
        self.lock().running += 1;
    }

    pub fn task_succeeded(&self) {
        let mut counts = self.lock();
        counts.running = counts.running.saturating_sub(1);
        counts.success += 1;
    }

    pub fn task_failed(&self) {
        let mut counts = self.lock();
        counts.running = counts.running.saturating_sub(1);
        counts.failed += 1;
    }

    pub fn snapshot(&self) -> TaskResultCounts {
        *self.lock()
    }

    /// Subtract previously flushed success and failure counts.
    ///
    /// Increments that happened after `flushed` was read are kept. The running gauge is untouched.
    pub fn drain(&self, flushed: &TaskResultCounts) {
        let mut counts = self.lock();
        counts.success = counts.success.saturating_sub(flushed.success);
        counts.failed = counts.failed.saturating_sub(flushed.failed);
    }
}
