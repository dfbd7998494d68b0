use chrono::{DateTime, Utc};
use runstat::{
    counters::TaskResultCounts, record::TaskResultStatistics, repository::RepositoryError,
};
use sqlx::prelude::FromRow;

#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "runstat_granularity", rename_all = "UPPERCASE")]
pub(crate) enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
}

impl From<Granularity> for runstat::granularity::Granularity {
    fn from(value: Granularity) -> Self {
        match value {
            Granularity::Second => Self::Second,
            Granularity::Minute => Self::Minute,
            Granularity::Hour => Self::Hour,
            Granularity::Day => Self::Day,
        }
    }
}

impl From<runstat::granularity::Granularity> for Granularity {
    fn from(value: runstat::granularity::Granularity) -> Self {
        match value {
            runstat::granularity::Granularity::Second => Self::Second,
            runstat::granularity::Granularity::Minute => Self::Minute,
            runstat::granularity::Granularity::Hour => Self::Hour,
            runstat::granularity::Granularity::Day => Self::Day,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct TaskResultStatisticsRow {
    pub granularity: Granularity,
    pub interval_start: DateTime<Utc>,
    pub running_count: i64,
    pub success_count: i64,
    pub failed_count: i64,
}

impl TryFrom<TaskResultStatisticsRow> for TaskResultStatistics {
    type Error = RepositoryError;

    fn try_from(value: TaskResultStatisticsRow) -> Result<Self, Self::Error> {
        let counts = TaskResultCounts {
            running: count_from_column("running_count", value.running_count)?,
            success: count_from_column("success_count", value.success_count)?,
            failed: count_from_column("failed_count", value.failed_count)?,
        };
        Ok(Self::new(
            counts,
            value.granularity.into(),
            value.interval_start,
        ))
    }
}

fn count_from_column(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::InvalidRecord(format!("{column} is negative: {value}")))
}

/// Postgres has no unsigned integers, counts are stored as `BIGINT`.
pub(crate) fn count_to_column(column: &str, value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| {
        RepositoryError::InvalidRecord(format!("{column} does not fit a BIGINT: {value}"))
    })
}
