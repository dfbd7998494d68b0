//! Provides an in memory implementation of [`StatisticsRepository`].
//!
//! It is a correct but unoptimized implementation, designed for tests and for processes that do
//! not need the series to survive a restart.
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{RepositoryError, StatisticsRepository};
use crate::{granularity::Granularity, record::TaskResultStatistics};

type Key = (Granularity, DateTime<Utc>);

/// An in memory implementation of [`StatisticsRepository`].
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    records: Arc<RwLock<BTreeMap<Key, TaskResultStatistics>>>,
}

impl InMemoryRepository {
    /// Creates a new, empty instance of [`InMemoryRepository`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record for `granularity`, oldest first.
    pub fn records(
        &self,
        granularity: Granularity,
    ) -> Result<Vec<TaskResultStatistics>, RepositoryError> {
        Ok(self
            .records
            .read()
            .map_err(|_| RepositoryError::BadState)?
            .range(Self::bounds(granularity))
            .map(|(_, record)| record.clone())
            .collect())
    }

    /// The number of stored records over all granularities.
    pub fn len(&self) -> Result<usize, RepositoryError> {
        Ok(self
            .records
            .read()
            .map_err(|_| RepositoryError::BadState)?
            .len())
    }

    pub fn is_empty(&self) -> Result<bool, RepositoryError> {
        Ok(self.len()? == 0)
    }

    fn bounds(granularity: Granularity) -> std::ops::RangeInclusive<Key> {
        (granularity, DateTime::<Utc>::MIN_UTC)..=(granularity, DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl StatisticsRepository for InMemoryRepository {
    async fn find_latest(
        &self,
        granularity: Granularity,
    ) -> Result<Option<TaskResultStatistics>, RepositoryError> {
        Ok(self
            .records
            .read()
            .map_err(|_| RepositoryError::BadState)?
            .range(Self::bounds(granularity))
            .next_back()
            .map(|(_, record)| record.clone()))
    }

    async fn insert(&self, record: TaskResultStatistics) -> Result<bool, RepositoryError> {
        let mut records = self.records.write().map_err(|_| RepositoryError::BadState)?;
        match records.entry(record.key()) {
            std::collections::btree_map::Entry::Occupied(_) => Ok(false),
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(true)
            }
        }
    }

    async fn find_since(
        &self,
        granularity: Granularity,
        from: DateTime<Utc>,
    ) -> Result<Vec<TaskResultStatistics>, RepositoryError> {
        Ok(self
            .records
            .read()
            .map_err(|_| RepositoryError::BadState)?
            .range((granularity, from)..=(granularity, DateTime::<Utc>::MAX_UTC))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn delete_before(
        &self,
        granularity: Granularity,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut records = self.records.write().map_err(|_| RepositoryError::BadState)?;
        let before = records.len();
        records.retain(|(record_granularity, start), _| {
            *record_granularity != granularity || *start >= cutoff
        });
        Ok((before - records.len()) as u64)
    }
}
