//! Gap-free task result statistics.
//!
//! Runstat periodically records the shared task result counters ([`counters::SharedCounters`])
//! into a time series with one record per interval, at one or more [`granularity::Granularity`].
//! Each granularity is recorded by its own [`job::StatisticsJob`], fired on every interval
//! boundary. When a job finds intervals missing, for example after the process was down, it
//! back-fills every missing interval so the stored series never has holes.
//!
//! # Example
//!
//! ```
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! use runstat::prelude::*;
//! use runstat::repository::memory::InMemoryRepository;
//!
//! let counters = SharedCounters::new();
//! let scheduler = StatisticsScheduler::new(InMemoryRepository::new(), counters.clone())
//!     .with_job(JobConfig::new(Granularity::Minute))
//!     .unwrap()
//!     .with_job(JobConfig::new(Granularity::Hour).with_reset_policy(ResetPolicy::PerInterval))
//!     .unwrap();
//!
//! // The task tracker updates the counters as tasks run.
//! counters.task_started();
//! counters.task_succeeded();
//!
//! scheduler.graceful_shutdown().await.unwrap();
//! # });
//! ```
use std::collections::BTreeMap;

use futures::future::join_all;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod bucketing;
pub mod config;
pub mod counters;
pub mod granularity;
pub mod job;
pub mod prelude;
pub mod record;
pub mod repository;
pub mod schedule;

use config::StatisticsConfig;
use counters::SharedCounters;
use granularity::Granularity;
use job::{runner::JobRunner, JobConfig, ResetPolicy, StatisticsJob};
use repository::StatisticsRepository;
use schedule::ScheduleBuildError;

/// Runs one [`StatisticsJob`] per configured granularity against a shared repository and shared
/// counters.
///
/// Jobs start firing as soon as they are added. Call
/// [`StatisticsScheduler::graceful_shutdown`] to stop them.
#[derive(Debug)]
pub struct StatisticsScheduler<R> {
    repository: R,
    counters: SharedCounters,
    jobs: BTreeMap<Granularity, JoinHandle<()>>,
    resetting: Option<Granularity>,
    cancellation_token: CancellationToken,
}

impl<R> StatisticsScheduler<R>
where
    R: StatisticsRepository + Clone + Send + Sync + 'static,
{
    pub fn new(repository: R, counters: SharedCounters) -> Self {
        Self {
            repository,
            counters,
            jobs: Default::default(),
            resetting: None,
            cancellation_token: Default::default(),
        }
    }

    /// Build a scheduler running every job described by `config`.
    pub fn from_config(
        repository: R,
        counters: SharedCounters,
        config: &StatisticsConfig,
    ) -> Result<Self, RunstatError> {
        config.validate()?;
        config
            .jobs()
            .into_iter()
            .try_fold(Self::new(repository, counters), Self::with_job)
    }

    /// Schedule a job for `config.granularity`.
    ///
    /// Fails when the granularity already has a job, or when a second job asks to reset the
    /// shared counters.
    pub fn with_job(mut self, config: impl Into<JobConfig>) -> Result<Self, RunstatError> {
        let config = config.into();
        let granularity = config.granularity;
        if self.jobs.contains_key(&granularity) {
            return Err(RunstatError::DuplicateJob(granularity));
        }
        if config.reset_policy == ResetPolicy::PerInterval {
            if let Some(resetting) = self.resetting {
                return Err(RunstatError::MultipleResettingJobs(resetting));
            }
            self.resetting = Some(granularity);
        }

        let job = StatisticsJob::new(config, self.repository.clone(), self.counters.clone())?;
        tracing::debug!(
            %granularity,
            reset_policy = ?config.reset_policy,
            "Scheduling statistics job, first fire at {}",
            job.schedule().next_fire_time()
        );
        let handle = JobRunner::new(job).spawn(self.cancellation_token.child_token());
        self.jobs.insert(granularity, handle);
        Ok(self)
    }

    /// Schedule a cumulative job for every granularity that does not have one yet.
    pub fn with_all_granularities(self) -> Result<Self, RunstatError> {
        Granularity::iter().try_fold(self, |this, granularity| {
            if this.jobs.contains_key(&granularity) {
                Ok(this)
            } else {
                this.with_job(granularity)
            }
        })
    }

    /// The granularities with a running job.
    pub fn granularities(&self) -> impl Iterator<Item = Granularity> + '_ {
        self.jobs.keys().copied()
    }

    pub fn counters(&self) -> &SharedCounters {
        &self.counters
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Stop every job and wait for them to finish.
    ///
    /// A fire in progress runs to completion first.
    pub async fn graceful_shutdown(self) -> Result<(), RunstatError> {
        tracing::debug!("Shutting down statistics jobs");
        self.cancellation_token.cancel();
        join_all(self.jobs.into_values())
            .await
            .into_iter()
            .try_for_each(|result| {
                result.map_err(|err| {
                    tracing::error!(?err, "Statistics job did not shut down cleanly: {err}");
                    RunstatError::GracefulShutdownFailed
                })
            })
    }
}

/// Errors setting up or shutting down a [`StatisticsScheduler`].
#[derive(Debug, Error)]
pub enum RunstatError {
    #[error("Failed to gracefully shut down")]
    GracefulShutdownFailed,
    #[error("A statistics job for {0} is already scheduled")]
    DuplicateJob(Granularity),
    #[error("Only one job may reset the shared counters, {0} already does")]
    MultipleResettingJobs(Granularity),
    #[error("The resetting granularity {0} is not scheduled")]
    UnscheduledResettingJob(Granularity),
    #[error("Error building the schedule")]
    Schedule(#[from] ScheduleBuildError),
    #[error("Error reading the configuration")]
    Config(#[from] serde_json::Error),
}
