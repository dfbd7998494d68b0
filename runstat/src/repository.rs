//! The API for implementing a statistics repository.
//!
//! A repository durably stores [`TaskResultStatistics`] with at most one record per granularity
//! and interval start. An in memory implementation is provided in [`memory`], a Postgres
//! implementation lives in the `runstat-sqlx` crate.
//!
//! Implementors should run the shared test suite via [`crate::repository_test_suite`].
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{granularity::Granularity, record::TaskResultStatistics};

pub mod memory;
#[doc(hidden)]
pub mod testing;

/// Persistence for the task result statistics series.
#[async_trait]
pub trait StatisticsRepository {
    /// The record with the latest interval start for `granularity`, if any.
    async fn find_latest(
        &self,
        granularity: Granularity,
    ) -> Result<Option<TaskResultStatistics>, RepositoryError>;

    /// Store `record`.
    ///
    /// Returns `Ok(false)` without touching the stored data when a record with the same
    /// granularity and interval start already exists.
    async fn insert(&self, record: TaskResultStatistics) -> Result<bool, RepositoryError>;

    /// All records for `granularity` with an interval start at or after `from`, oldest first.
    async fn find_since(
        &self,
        granularity: Granularity,
        from: DateTime<Utc>,
    ) -> Result<Vec<TaskResultStatistics>, RepositoryError>;

    /// Delete the records for `granularity` starting before `cutoff`, returning how many went.
    async fn delete_before(
        &self,
        granularity: Granularity,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}

#[async_trait]
impl<R> StatisticsRepository for std::sync::Arc<R>
where
    R: StatisticsRepository + Send + Sync + ?Sized,
{
    async fn find_latest(
        &self,
        granularity: Granularity,
    ) -> Result<Option<TaskResultStatistics>, RepositoryError> {
        self.as_ref().find_latest(granularity).await
    }

    async fn insert(&self, record: TaskResultStatistics) -> Result<bool, RepositoryError> {
        self.as_ref().insert(record).await
    }

    async fn find_since(
        &self,
        granularity: Granularity,
        from: DateTime<Utc>,
    ) -> Result<Vec<TaskResultStatistics>, RepositoryError> {
        self.as_ref().find_since(granularity, from).await
    }

    async fn delete_before(
        &self,
        granularity: Granularity,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        self.as_ref().delete_before(granularity, cutoff).await
    }
}

/// Errors that can occur when reading or writing statistics.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The repository is in a bad state, for example a poisoned lock.
    #[error("Repository in bad state")]
    BadState,
    /// A stored row could not be turned back into a record.
    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),
    /// An error reported by the underlying storage.
    #[error(transparent)]
    Storage(Box<dyn std::error::Error + Send + Sync>),
}
