//! The recurring statistics job.
//!
//! Every fire of a [`StatisticsJob`] brings the stored series for its granularity up to date:
//!
//! - with no stored record it writes one record for the current interval,
//! - when the latest record is the current interval it does nothing,
//! - otherwise it writes one record for every interval after the latest record up to and
//!   including the current one.
//!
//! All records written by one fire carry the same counts, read once from the
//! [`SharedCounters`] at the start of the fire. Back-filled intervals were not measured
//! individually, they repeat the latest observation.
//!
//! A repository error stops the fire. The next fire starts again from the latest stored record,
//! so the series heals itself once the repository recovers.
use std::num::NonZeroU32;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::{
    bucketing,
    counters::{SharedCounters, TaskResultCounts},
    granularity::Granularity,
    record::TaskResultStatistics,
    repository::{RepositoryError, StatisticsRepository},
    schedule::{self, ScheduleBuildError, ScheduleSpec},
};

pub mod runner;

use runner::ScheduledJob;

/// What happens to the shared counters after a job has flushed them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Leave the counters untouched. Each record carries the totals observed when it was written.
    #[default]
    Cumulative,
    /// Subtract the flushed success and failure counts once a fire has stored at least one
    /// record, even when a later insert of the same fire fails. Each record then carries the
    /// results since the previous flush.
    ///
    /// Only one job sharing a set of counters may use this policy.
    PerInterval,
}

/// Configuration for a single [`StatisticsJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub granularity: Granularity,
    #[serde(default)]
    pub reset_policy: ResetPolicy,
    /// The number of most recent intervals to keep. Older records are deleted after each flush.
    #[serde(default)]
    pub retention: Option<NonZeroU32>,
}

impl JobConfig {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            reset_policy: ResetPolicy::default(),
            retention: None,
        }
    }

    pub fn with_reset_policy(self, reset_policy: ResetPolicy) -> Self {
        Self {
            reset_policy,
            ..self
        }
    }

    pub fn with_retention(self, retention: Option<NonZeroU32>) -> Self {
        Self { retention, ..self }
    }
}

impl From<Granularity> for JobConfig {
    fn from(granularity: Granularity) -> Self {
        Self::new(granularity)
    }
}

/// The context handed to a job by the scheduler for a single fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireContext {
    /// The boundary the fire was scheduled for.
    pub scheduled_for: DateTime<Utc>,
    /// When the fire actually started. The job treats this as the current time.
    pub fired_at: DateTime<Utc>,
}

impl FireContext {
    /// A context for a fire happening at `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            scheduled_for: now,
            fired_at: now,
        }
    }
}

/// The result of a fire that completed without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// Records were written. `duplicates` counts intervals the repository already held.
    Recorded { inserted: u64, duplicates: u64 },
    /// The latest stored record is for the current interval.
    UpToDate,
    /// The latest stored record is later than the current interval, nothing was written.
    ClockSkew {
        latest: DateTime<Utc>,
        now_bucket: DateTime<Utc>,
    },
}

/// Errors that abort a single fire. None of them stop the schedule.
#[derive(Debug, Error)]
pub enum FireError {
    #[error("Failed to persist {granularity} statistics after {inserted} inserts")]
    Persistence {
        granularity: Granularity,
        inserted: u64,
        #[source]
        source: RepositoryError,
    },
    #[error("{intervals} {granularity} intervals from {from} is out of range")]
    OutOfRange {
        granularity: Granularity,
        from: DateTime<Utc>,
        intervals: i64,
    },
}

/// Records the task result statistics for one granularity.
pub struct StatisticsJob<R> {
    config: JobConfig,
    schedule: ScheduleSpec,
    repository: R,
    counters: SharedCounters,
}

impl<R> StatisticsJob<R>
where
    R: StatisticsRepository,
{
    pub fn new(
        config: impl Into<JobConfig>,
        repository: R,
        counters: SharedCounters,
    ) -> Result<Self, ScheduleBuildError> {
        let config = config.into();
        Ok(Self {
            schedule: schedule::build_schedule(config.granularity)?,
            config,
            repository,
            counters,
        })
    }

    /// Replace the configuration, rebuilding the schedule.
    ///
    /// Only meant for tests and reconfiguration before the job is handed to a runner.
    pub fn with_config(self, config: impl Into<JobConfig>) -> Result<Self, ScheduleBuildError> {
        Self::new(config, self.repository, self.counters)
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn granularity(&self) -> Granularity {
        self.config.granularity
    }

    pub fn schedule(&self) -> &ScheduleSpec {
        &self.schedule
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn counters(&self) -> &SharedCounters {
        &self.counters
    }

    /// Bring the stored series up to date with the interval containing `context.fired_at`.
    #[instrument(skip(self), fields(granularity = %self.config.granularity))]
    pub async fn on_fire(&self, context: FireContext) -> Result<FireOutcome, FireError> {
        let granularity = self.config.granularity;
        let now_bucket = bucketing::aligned_start(context.fired_at, granularity);
        let counts = self.counters.snapshot();

        let latest = self
            .repository
            .find_latest(granularity)
            .await
            .map_err(|source| FireError::Persistence {
                granularity,
                inserted: 0,
                source,
            })?;

        let (from, intervals) = match latest {
            None => (now_bucket, 0..=0),
            Some(latest) => {
                let last = latest.interval_start();
                let gap = bucketing::intervals_between(last, now_bucket, granularity);
                if gap < 0 {
                    tracing::warn!(
                        %last,
                        %now_bucket,
                        "Latest {granularity} statistics are {} intervals in the future, skipping",
                        -gap
                    );
                    return Ok(FireOutcome::ClockSkew {
                        latest: last,
                        now_bucket,
                    });
                }
                if gap == 0 {
                    tracing::debug!(%now_bucket, "{granularity} statistics already up to date");
                    return Ok(FireOutcome::UpToDate);
                }
                if gap > 1 {
                    tracing::info!(
                        %last,
                        %now_bucket,
                        "Back-filling {gap} {granularity} intervals"
                    );
                }
                (last, 1..=gap)
            }
        };

        let mut inserted = 0;
        let mut duplicates = 0;
        let mut failure = None;
        for offset in intervals {
            let Some(interval_start) = bucketing::shift(from, granularity, offset) else {
                failure = Some(FireError::OutOfRange {
                    granularity,
                    from,
                    intervals: offset,
                });
                break;
            };
            let record = TaskResultStatistics::new(counts, granularity, interval_start);
            match self.repository.insert(record).await {
                Ok(true) => inserted += 1,
                Ok(false) => {
                    duplicates += 1;
                    tracing::warn!(%interval_start, "{granularity} statistics already stored");
                }
                Err(source) => {
                    failure = Some(FireError::Persistence {
                        granularity,
                        inserted,
                        source,
                    });
                    break;
                }
            }
        }

        // Counts stored by a partially failed fire must not be written again by the next one.
        if inserted > 0 {
            self.drain_flushed(&counts);
        }
        if let Some(err) = failure {
            return Err(err);
        }
        if inserted > 0 {
            self.apply_retention(now_bucket).await;
        }
        tracing::debug!(inserted, duplicates, "Recorded {granularity} statistics");
        Ok(FireOutcome::Recorded {
            inserted,
            duplicates,
        })
    }

    fn drain_flushed(&self, flushed: &TaskResultCounts) {
        if self.config.reset_policy == ResetPolicy::PerInterval {
            self.counters.drain(flushed);
        }
    }

    async fn apply_retention(&self, now_bucket: DateTime<Utc>) {
        let Some(retention) = self.config.retention else {
            return;
        };
        let granularity = self.config.granularity;
        let keep = i64::from(retention.get()) - 1;
        let Some(cutoff) = bucketing::shift(now_bucket, granularity, -keep) else {
            return;
        };
        match self.repository.delete_before(granularity, cutoff).await {
            Ok(0) => {}
            Ok(deleted) => {
                tracing::debug!(%cutoff, "Deleted {deleted} {granularity} statistics records")
            }
            Err(err) => tracing::error!(
                ?err,
                %cutoff,
                "Failed to delete old {granularity} statistics: {err}"
            ),
        }
    }
}

#[async_trait]
impl<R> ScheduledJob for StatisticsJob<R>
where
    R: StatisticsRepository + Send + Sync,
{
    fn schedule(&self) -> &ScheduleSpec {
        &self.schedule
    }

    async fn fire(&self, context: FireContext) {
        let job_name = self.schedule.job_name();
        match self.on_fire(context).await {
            Ok(FireOutcome::Recorded {
                inserted,
                duplicates,
            }) => tracing::debug!(job_name, inserted, duplicates, "{job_name} fired"),
            Ok(FireOutcome::UpToDate) => tracing::debug!(job_name, "{job_name} up to date"),
            Ok(FireOutcome::ClockSkew { latest, now_bucket }) => tracing::warn!(
                job_name,
                %latest,
                %now_bucket,
                "{job_name} found statistics later than the current interval"
            ),
            Err(err) => tracing::error!(?err, job_name, "{job_name} failed: {err}"),
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use assert_matches::assert_matches;
    use chrono::{TimeDelta, TimeZone};
    use mockall::{mock, predicate::eq, Sequence};

    use super::*;
    use crate::repository::memory::InMemoryRepository;

    mock! {
        pub Repository {}

        #[async_trait]
        impl StatisticsRepository for Repository {
            async fn find_latest(
                &self,
                granularity: Granularity,
            ) -> Result<Option<TaskResultStatistics>, RepositoryError>;
            async fn insert(&self, record: TaskResultStatistics) -> Result<bool, RepositoryError>;
            async fn find_since(
                &self,
                granularity: Granularity,
                from: DateTime<Utc>,
            ) -> Result<Vec<TaskResultStatistics>, RepositoryError>;
            async fn delete_before(
                &self,
                granularity: Granularity,
                cutoff: DateTime<Utc>,
            ) -> Result<u64, RepositoryError>;
        }
    }

    /// Wraps an [`InMemoryRepository`] and fails every insert after the first `allowed`.
    #[derive(Clone)]
    struct FlakyRepository {
        inner: InMemoryRepository,
        allowed: Arc<AtomicUsize>,
    }

    impl FlakyRepository {
        fn new(inner: InMemoryRepository, allowed: usize) -> Self {
            Self {
                inner,
                allowed: Arc::new(AtomicUsize::new(allowed)),
            }
        }

        fn allow(&self, allowed: usize) {
            self.allowed.store(allowed, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StatisticsRepository for FlakyRepository {
        async fn find_latest(
            &self,
            granularity: Granularity,
        ) -> Result<Option<TaskResultStatistics>, RepositoryError> {
            self.inner.find_latest(granularity).await
        }

        async fn insert(&self, record: TaskResultStatistics) -> Result<bool, RepositoryError> {
            let remaining = self.allowed.load(Ordering::SeqCst);
            if remaining == 0 {
                return Err(RepositoryError::BadState);
            }
            self.allowed.store(remaining - 1, Ordering::SeqCst);
            self.inner.insert(record).await
        }

        async fn find_since(
            &self,
            granularity: Granularity,
            from: DateTime<Utc>,
        ) -> Result<Vec<TaskResultStatistics>, RepositoryError> {
            self.inner.find_since(granularity, from).await
        }

        async fn delete_before(
            &self,
            granularity: Granularity,
            cutoff: DateTime<Utc>,
        ) -> Result<u64, RepositoryError> {
            self.inner.delete_before(granularity, cutoff).await
        }
    }

    fn ten_o_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).unwrap()
    }

    fn counts(running: u64, success: u64, failed: u64) -> TaskResultCounts {
        TaskResultCounts {
            running,
            success,
            failed,
        }
    }

    fn job<R: StatisticsRepository>(
        config: impl Into<JobConfig>,
        repository: R,
    ) -> StatisticsJob<R> {
        StatisticsJob::new(config, repository, SharedCounters::new()).unwrap()
    }

    fn starts(records: &[TaskResultStatistics]) -> Vec<DateTime<Utc>> {
        records
            .iter()
            .map(TaskResultStatistics::interval_start)
            .collect()
    }

    #[test]
    fn schedule_matches_granularity() {
        let job = job(Granularity::Hour, MockRepository::new());

        assert_eq!(job.schedule().granularity(), Granularity::Hour);
        assert_eq!(job.schedule().job_name(), "TaskResultStatisticsJob_HOUR");
        assert_eq!(
            job.schedule().trigger_name(),
            "TaskResultStatisticsJobTrigger_HOUR"
        );
    }

    #[test]
    fn with_config_rebuilds_schedule() {
        let job = job(Granularity::Hour, MockRepository::new())
            .with_config(JobConfig::new(Granularity::Second))
            .unwrap();

        assert_eq!(job.granularity(), Granularity::Second);
        assert_eq!(job.schedule().job_name(), "TaskResultStatisticsJob_SECOND");
    }

    #[tokio::test]
    async fn empty_repository_records_current_interval() {
        let mut repository = MockRepository::new();
        repository
            .expect_find_latest()
            .with(eq(Granularity::Minute))
            .times(1)
            .returning(|_| Ok(None));
        repository
            .expect_insert()
            .withf(|record| {
                record.granularity() == Granularity::Minute
                    && record.interval_start() == ten_o_clock()
            })
            .times(1)
            .returning(|_| Ok(true));
        let job = job(Granularity::Minute, repository);

        let outcome = job.on_fire(FireContext::at(ten_o_clock())).await;

        assert_matches!(
            outcome,
            Ok(FireOutcome::Recorded {
                inserted: 1,
                duplicates: 0
            })
        );
    }

    #[tokio::test]
    async fn empty_repository_records_once_per_granularity() {
        let inserts = Arc::new(AtomicUsize::new(0));
        let mut job = job(Granularity::Second, {
            let inserts = inserts.clone();
            let mut repository = MockRepository::new();
            repository.expect_find_latest().times(3).returning(|_| Ok(None));
            repository.expect_insert().times(3).returning(move |_| {
                inserts.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            });
            repository
        });

        for granularity in [Granularity::Second, Granularity::Minute, Granularity::Hour] {
            job = job.with_config(granularity).unwrap();
            job.on_fire(FireContext::at(Utc::now())).await.unwrap();
        }

        assert_eq!(inserts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn back_fills_three_intervals_for_every_granularity() {
        let now = Utc::now();
        let mut repository = MockRepository::new();
        repository
            .expect_find_latest()
            .times(Granularity::ALL.len())
            .returning(move |granularity| {
                Ok(Some(TaskResultStatistics::new(
                    TaskResultCounts::default(),
                    granularity,
                    bucketing::shift(now, granularity, -3).unwrap(),
                )))
            });
        repository
            .expect_insert()
            .times(Granularity::ALL.len() * 3)
            .returning(|_| Ok(true));
        let mut job = job(Granularity::Second, repository);

        for granularity in Granularity::iter() {
            job = job.with_config(granularity).unwrap();
            let outcome = job.on_fire(FireContext::at(now)).await;
            assert_matches!(
                outcome,
                Ok(FireOutcome::Recorded {
                    inserted: 3,
                    duplicates: 0
                })
            );
        }
    }

    #[tokio::test]
    async fn back_fill_inserts_in_order_ending_at_current_interval() {
        let now = ten_o_clock() + TimeDelta::seconds(12);
        let mut sequence = Sequence::new();
        let mut repository = MockRepository::new();
        repository.expect_find_latest().returning(|granularity| {
            Ok(Some(TaskResultStatistics::new(
                TaskResultCounts::default(),
                granularity,
                ten_o_clock() - TimeDelta::minutes(3),
            )))
        });
        for minutes_ago in [2, 1, 0] {
            repository
                .expect_insert()
                .withf(move |record| {
                    record.interval_start() == ten_o_clock() - TimeDelta::minutes(minutes_ago)
                })
                .times(1)
                .in_sequence(&mut sequence)
                .returning(|_| Ok(true));
        }
        let job = job(Granularity::Minute, repository);

        job.on_fire(FireContext::at(now)).await.unwrap();
    }

    #[tokio::test]
    async fn gap_of_k_intervals_inserts_k_contiguous_records() {
        for k in [1, 2, 7, 60] {
            let repository = InMemoryRepository::new();
            let last = bucketing::shift(ten_o_clock(), Granularity::Second, -k).unwrap();
            repository
                .insert(TaskResultStatistics::new(
                    Default::default(),
                    Granularity::Second,
                    last,
                ))
                .await
                .unwrap();
            let job = job(Granularity::Second, repository.clone());

            let outcome = job.on_fire(FireContext::at(ten_o_clock())).await.unwrap();

            assert_eq!(
                outcome,
                FireOutcome::Recorded {
                    inserted: k as u64,
                    duplicates: 0
                }
            );
            let new_records = repository
                .find_since(Granularity::Second, last + TimeDelta::seconds(1))
                .await
                .unwrap();
            let expected = (1..=k)
                .map(|i| bucketing::shift(last, Granularity::Second, i).unwrap())
                .collect::<Vec<_>>();
            assert_eq!(starts(&new_records), expected);
            assert_eq!(expected.last(), Some(&ten_o_clock()));
        }
    }

    #[tokio::test]
    async fn back_fill_across_days() {
        let repository = InMemoryRepository::new();
        let last = Utc.with_ymd_and_hms(2024, 2, 27, 0, 0, 0).unwrap();
        repository
            .insert(TaskResultStatistics::new(
                Default::default(),
                Granularity::Day,
                last,
            ))
            .await
            .unwrap();
        let job = job(Granularity::Day, repository.clone());

        job.on_fire(FireContext::at(
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap(),
        ))
        .await
        .unwrap();

        let records = repository.records(Granularity::Day).unwrap();
        assert_eq!(
            starts(&records),
            vec![
                last,
                Utc.with_ymd_and_hms(2024, 2, 28, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn firing_twice_in_one_interval_records_once() {
        let repository = InMemoryRepository::new();
        let job = job(Granularity::Minute, repository.clone());

        let first = job.on_fire(FireContext::at(ten_o_clock())).await.unwrap();
        let second = job
            .on_fire(FireContext::at(ten_o_clock() + TimeDelta::seconds(59)))
            .await
            .unwrap();

        assert_eq!(
            first,
            FireOutcome::Recorded {
                inserted: 1,
                duplicates: 0
            }
        );
        assert_eq!(second, FireOutcome::UpToDate);
        assert_eq!(repository.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn find_latest_round_trips_each_fire() {
        let repository = InMemoryRepository::new();
        let job = job(Granularity::Hour, repository.clone());

        for hours in [0, 1, 4, 5] {
            let now = ten_o_clock() + TimeDelta::hours(hours) + TimeDelta::minutes(7);
            job.on_fire(FireContext::at(now)).await.unwrap();

            let latest = repository
                .find_latest(Granularity::Hour)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                latest.interval_start(),
                ten_o_clock() + TimeDelta::hours(hours)
            );
        }
        assert_eq!(repository.records(Granularity::Hour).unwrap().len(), 6);
    }

    #[tokio::test]
    async fn latest_in_the_future_is_skipped() {
        let mut repository = MockRepository::new();
        let future = ten_o_clock() + TimeDelta::minutes(5);
        repository.expect_find_latest().returning(move |granularity| {
            Ok(Some(TaskResultStatistics::new(
                TaskResultCounts::default(),
                granularity,
                future,
            )))
        });
        repository.expect_insert().never();
        let job = job(Granularity::Minute, repository);

        let outcome = job.on_fire(FireContext::at(ten_o_clock())).await;

        assert_matches!(
            outcome,
            Ok(FireOutcome::ClockSkew { latest, now_bucket })
                if latest == future && now_bucket == ten_o_clock()
        );
    }

    #[tokio::test]
    async fn find_latest_failure_aborts_fire() {
        let mut repository = MockRepository::new();
        repository
            .expect_find_latest()
            .returning(|_| Err(RepositoryError::BadState));
        repository.expect_insert().never();
        let job = job(Granularity::Minute, repository);

        let outcome = job.on_fire(FireContext::at(ten_o_clock())).await;

        assert_matches!(
            outcome,
            Err(FireError::Persistence {
                granularity: Granularity::Minute,
                inserted: 0,
                source: RepositoryError::BadState
            })
        );
    }

    #[tokio::test]
    async fn insert_failure_stops_remaining_back_fill() {
        let mut sequence = Sequence::new();
        let mut repository = MockRepository::new();
        repository.expect_find_latest().returning(|granularity| {
            Ok(Some(TaskResultStatistics::new(
                TaskResultCounts::default(),
                granularity,
                ten_o_clock() - TimeDelta::minutes(3),
            )))
        });
        repository
            .expect_insert()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(true));
        repository
            .expect_insert()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Err(RepositoryError::BadState));
        let job = job(Granularity::Minute, repository);

        let outcome = job.on_fire(FireContext::at(ten_o_clock())).await;

        assert_matches!(
            outcome,
            Err(FireError::Persistence {
                inserted: 1,
                ..
            })
        );
    }

    #[tokio::test]
    async fn next_fire_resumes_after_failure() {
        let memory = InMemoryRepository::new();
        memory
            .insert(TaskResultStatistics::new(
                Default::default(),
                Granularity::Minute,
                ten_o_clock() - TimeDelta::minutes(4),
            ))
            .await
            .unwrap();
        let repository = FlakyRepository::new(memory.clone(), 2);
        let job = job(Granularity::Minute, repository.clone());

        let failed = job.on_fire(FireContext::at(ten_o_clock())).await;
        assert_matches!(failed, Err(FireError::Persistence { inserted: 2, .. }));

        repository.allow(usize::MAX);
        let resumed = job
            .on_fire(FireContext::at(ten_o_clock() + TimeDelta::seconds(30)))
            .await
            .unwrap();

        assert_eq!(
            resumed,
            FireOutcome::Recorded {
                inserted: 2,
                duplicates: 0
            }
        );
        let expected = (0..=4)
            .rev()
            .map(|minutes_ago| ten_o_clock() - TimeDelta::minutes(minutes_ago))
            .collect::<Vec<_>>();
        assert_eq!(
            starts(&memory.records(Granularity::Minute).unwrap()),
            expected
        );
    }

    #[tokio::test]
    async fn duplicate_insert_is_counted_and_skipped() {
        let mut repository = MockRepository::new();
        repository.expect_find_latest().returning(|_| Ok(None));
        repository.expect_insert().times(1).returning(|_| Ok(false));
        let job = job(Granularity::Minute, repository);

        let outcome = job.on_fire(FireContext::at(ten_o_clock())).await;

        assert_matches!(
            outcome,
            Ok(FireOutcome::Recorded {
                inserted: 0,
                duplicates: 1
            })
        );
    }

    #[tokio::test]
    async fn back_filled_records_share_one_snapshot() {
        let repository = InMemoryRepository::new();
        repository
            .insert(TaskResultStatistics::new(
                Default::default(),
                Granularity::Minute,
                ten_o_clock() - TimeDelta::minutes(3),
            ))
            .await
            .unwrap();
        let counters = SharedCounters::with_counts(counts(2, 7, 1));
        let job = StatisticsJob::new(Granularity::Minute, repository.clone(), counters).unwrap();

        job.on_fire(FireContext::at(ten_o_clock())).await.unwrap();

        let new_records = repository
            .find_since(Granularity::Minute, ten_o_clock() - TimeDelta::minutes(2))
            .await
            .unwrap();
        assert_eq!(new_records.len(), 3);
        assert!(new_records
            .iter()
            .all(|record| record.counts() == counts(2, 7, 1)));
    }

    #[tokio::test]
    async fn cumulative_policy_leaves_counters_untouched() {
        let repository = InMemoryRepository::new();
        let counters = SharedCounters::new();
        let job = StatisticsJob::new(Granularity::Minute, repository.clone(), counters.clone())
            .unwrap();

        counters.task_started();
        counters.task_succeeded();
        job.on_fire(FireContext::at(ten_o_clock())).await.unwrap();
        counters.task_started();
        counters.task_failed();
        job.on_fire(FireContext::at(ten_o_clock() + TimeDelta::minutes(1)))
            .await
            .unwrap();

        let records = repository.records(Granularity::Minute).unwrap();
        assert_eq!(records[0].counts(), counts(0, 1, 0));
        assert_eq!(records[1].counts(), counts(0, 1, 1));
        assert_eq!(counters.snapshot(), counts(0, 1, 1));
    }

    #[tokio::test]
    async fn per_interval_policy_drains_flushed_counts() {
        let repository = InMemoryRepository::new();
        let counters = SharedCounters::new();
        let job = StatisticsJob::new(
            JobConfig::new(Granularity::Minute).with_reset_policy(ResetPolicy::PerInterval),
            repository.clone(),
            counters.clone(),
        )
        .unwrap();

        counters.task_started();
        counters.task_started();
        counters.task_succeeded();
        job.on_fire(FireContext::at(ten_o_clock())).await.unwrap();
        assert_eq!(counters.snapshot(), counts(1, 0, 0));

        counters.task_failed();
        job.on_fire(FireContext::at(ten_o_clock() + TimeDelta::minutes(1)))
            .await
            .unwrap();

        let records = repository.records(Granularity::Minute).unwrap();
        assert_eq!(records[0].counts(), counts(1, 1, 0));
        assert_eq!(records[1].counts(), counts(0, 0, 1));
        assert_eq!(counters.snapshot(), counts(0, 0, 0));
    }

    #[tokio::test]
    async fn per_interval_policy_keeps_counts_when_nothing_is_stored() {
        let mut repository = MockRepository::new();
        repository.expect_find_latest().returning(|_| Ok(None));
        repository
            .expect_insert()
            .returning(|_| Err(RepositoryError::BadState));
        let counters = SharedCounters::with_counts(counts(0, 3, 2));
        let job = StatisticsJob::new(
            JobConfig::new(Granularity::Minute).with_reset_policy(ResetPolicy::PerInterval),
            repository,
            counters.clone(),
        )
        .unwrap();

        let _ = job.on_fire(FireContext::at(ten_o_clock())).await;

        assert_eq!(counters.snapshot(), counts(0, 3, 2));
    }

    #[tokio::test]
    async fn per_interval_policy_drains_counts_stored_before_a_failure() {
        let memory = InMemoryRepository::new();
        memory
            .insert(TaskResultStatistics::new(
                Default::default(),
                Granularity::Minute,
                ten_o_clock() - TimeDelta::minutes(3),
            ))
            .await
            .unwrap();
        let repository = FlakyRepository::new(memory.clone(), 1);
        let counters = SharedCounters::with_counts(counts(0, 5, 0));
        let job = StatisticsJob::new(
            JobConfig::new(Granularity::Minute).with_reset_policy(ResetPolicy::PerInterval),
            repository.clone(),
            counters.clone(),
        )
        .unwrap();

        let failed = job.on_fire(FireContext::at(ten_o_clock())).await;
        assert_matches!(failed, Err(FireError::Persistence { inserted: 1, .. }));
        assert_eq!(counters.snapshot(), counts(0, 0, 0));

        counters.task_succeeded();
        repository.allow(usize::MAX);
        job.on_fire(FireContext::at(ten_o_clock() + TimeDelta::seconds(30)))
            .await
            .unwrap();

        let stored = memory
            .find_since(Granularity::Minute, ten_o_clock() - TimeDelta::minutes(2))
            .await
            .unwrap();
        assert_eq!(
            stored.iter().map(TaskResultStatistics::counts).collect::<Vec<_>>(),
            vec![counts(0, 5, 0), counts(0, 1, 0), counts(0, 1, 0)]
        );
        assert_eq!(counters.snapshot(), counts(0, 0, 0));
    }

    #[tokio::test]
    async fn retention_deletes_records_outside_window() {
        let mut repository = MockRepository::new();
        repository.expect_find_latest().returning(|_| Ok(None));
        repository.expect_insert().returning(|_| Ok(true));
        repository
            .expect_delete_before()
            .with(
                eq(Granularity::Minute),
                eq(ten_o_clock() - TimeDelta::minutes(9)),
            )
            .times(1)
            .returning(|_, _| Ok(4));
        let job = job(
            JobConfig::new(Granularity::Minute).with_retention(NonZeroU32::new(10)),
            repository,
        );

        job.on_fire(FireContext::at(ten_o_clock())).await.unwrap();
    }

    #[tokio::test]
    async fn retention_failure_does_not_fail_fire() {
        let mut repository = MockRepository::new();
        repository.expect_find_latest().returning(|_| Ok(None));
        repository.expect_insert().returning(|_| Ok(true));
        repository
            .expect_delete_before()
            .returning(|_, _| Err(RepositoryError::BadState));
        let job = job(
            JobConfig::new(Granularity::Hour).with_retention(NonZeroU32::new(1)),
            repository,
        );

        let outcome = job.on_fire(FireContext::at(ten_o_clock())).await;

        assert_matches!(outcome, Ok(FireOutcome::Recorded { inserted: 1, .. }));
    }

    #[tokio::test]
    async fn retention_keeps_the_configured_number_of_intervals() {
        let repository = InMemoryRepository::new();
        let job = job(
            JobConfig::new(Granularity::Second).with_retention(NonZeroU32::new(3)),
            repository.clone(),
        );

        for seconds in 0..6 {
            job.on_fire(FireContext::at(ten_o_clock() + TimeDelta::seconds(seconds)))
                .await
                .unwrap();
        }

        let records = repository.records(Granularity::Second).unwrap();
        assert_eq!(
            starts(&records),
            vec![
                ten_o_clock() + TimeDelta::seconds(3),
                ten_o_clock() + TimeDelta::seconds(4),
                ten_o_clock() + TimeDelta::seconds(5),
            ]
        );
    }
}
