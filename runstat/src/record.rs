//! The stored statistics record, one per granularity and interval.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{bucketing, counters::TaskResultCounts, granularity::Granularity};

/// The task result counts recorded for one interval.
///
/// A record is identified by its granularity and interval start; repositories store at most one
/// record per pair. Records are immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskResultStatistics {
    running_count: u64,
    success_count: u64,
    failed_count: u64,
    granularity: Granularity,
    interval_start: DateTime<Utc>,
}

impl TaskResultStatistics {
    /// Create a record for the interval containing `interval_start`.
    ///
    /// The start is aligned to the granularity, so passing any instant within the interval gives
    /// the same record.
    pub fn new(
        counts: TaskResultCounts,
        granularity: Granularity,
        interval_start: DateTime<Utc>,
    ) -> Self {
        Self {
            running_count: counts.running,
            success_count: counts.success,
            failed_count: counts.failed,
            granularity,
            interval_start: bucketing::aligned_start(interval_start, granularity),
        }
    }

    pub fn running_count(&self) -> u64 {
        self.running_count
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_count
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn interval_start(&self) -> DateTime<Utc> {
        self.interval_start
    }

    pub fn counts(&self) -> TaskResultCounts {
        TaskResultCounts {
            running: self.running_count,
            success: self.success_count,
            failed: self.failed_count,
        }
    }

    /// The unique key of the record within a repository.
    pub fn key(&self) -> (Granularity, DateTime<Utc>) {
        (self.granularity, self.interval_start)
    }
}
