//! Trigger specifications for the statistics jobs.
//!
//! A [`ScheduleSpec`] fires exactly once per interval, on every boundary of its granularity.
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{bucketing, granularity::Granularity};

/// The kind of job recorded in the job and trigger names.
pub const JOB_KIND: &str = "TaskResultStatisticsJob";

/// Errors raised while building a schedule. These only happen during setup.
#[derive(Debug, Error)]
pub enum ScheduleBuildError {
    #[error("Unknown granularity: {0}")]
    UnknownGranularity(String),
    #[error("Invalid cron expression for {granularity}: {source}")]
    InvalidCron {
        granularity: Granularity,
        #[source]
        source: cron::error::Error,
    },
    #[error("No interval boundary after {0} for {1}")]
    OutOfRange(DateTime<Utc>, Granularity),
}

/// When and under which name a statistics job fires.
#[derive(Debug, Clone)]
pub struct ScheduleSpec {
    granularity: Granularity,
    job_name: String,
    trigger_name: String,
    cron: cron::Schedule,
    next_fire_time: DateTime<Utc>,
}

/// Build the schedule for `granularity` relative to the current time.
pub fn build_schedule(granularity: Granularity) -> Result<ScheduleSpec, ScheduleBuildError> {
    build_schedule_at(granularity, Utc::now())
}

/// Build the schedule for `granularity` as if the current time were `now`.
///
/// The first fire is at the start of the interval following the one containing `now`.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use runstat::{granularity::Granularity, schedule::build_schedule_at};
///
/// let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 17, 42).unwrap();
/// let spec = build_schedule_at(Granularity::Minute, now).unwrap();
///
/// assert_eq!(spec.job_name(), "TaskResultStatisticsJob_MINUTE");
/// assert_eq!(spec.trigger_name(), "TaskResultStatisticsJobTrigger_MINUTE");
/// assert_eq!(spec.next_fire_time(), Utc.with_ymd_and_hms(2024, 3, 1, 10, 18, 0).unwrap());
/// ```
pub fn build_schedule_at(
    granularity: Granularity,
    now: DateTime<Utc>,
) -> Result<ScheduleSpec, ScheduleBuildError> {
    let cron = cron::Schedule::from_str(granularity.cron_expression())
        .map_err(|source| ScheduleBuildError::InvalidCron {
            granularity,
            source,
        })?;
    let next_fire_time = bucketing::shift(now, granularity, 1)
        .ok_or(ScheduleBuildError::OutOfRange(now, granularity))?;

    Ok(ScheduleSpec {
        granularity,
        job_name: format!("{JOB_KIND}_{granularity}"),
        trigger_name: format!("{JOB_KIND}Trigger_{granularity}"),
        cron,
        next_fire_time,
    })
}

impl ScheduleSpec {
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn trigger_name(&self) -> &str {
        &self.trigger_name
    }

    /// The first fire time computed when the schedule was built.
    pub fn next_fire_time(&self) -> DateTime<Utc> {
        self.next_fire_time
    }

    /// The first boundary strictly after `after`.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron.after(&after).next()
    }
}
