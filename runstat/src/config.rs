//! Configuration for a [`crate::StatisticsScheduler`].
//!
//! The configuration is plain data, typically deserialized from JSON:
//!
//! ```
//! use runstat::{config::StatisticsConfig, granularity::Granularity, job::ResetPolicy};
//!
//! let config = StatisticsConfig::from_json(
//!     r#"{
//!         "granularities": ["MINUTE", "HOUR"],
//!         "resetting_granularity": "MINUTE",
//!         "retention": { "MINUTE": 1440 }
//!     }"#,
//! )
//! .unwrap();
//!
//! let jobs = config.jobs();
//! assert_eq!(jobs.len(), 2);
//! assert_eq!(jobs[0].granularity, Granularity::Minute);
//! assert_eq!(jobs[0].reset_policy, ResetPolicy::PerInterval);
//! assert_eq!(jobs[1].reset_policy, ResetPolicy::Cumulative);
//! assert_eq!(jobs[1].retention, None);
//! ```
use std::{collections::BTreeMap, num::NonZeroU32};

use serde::{Deserialize, Serialize};

use crate::{
    granularity::Granularity,
    job::{JobConfig, ResetPolicy},
    RunstatError,
};

/// Which statistics jobs to run and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatisticsConfig {
    /// The granularities to record. Defaults to all of them.
    pub granularities: Vec<Granularity>,
    /// The single granularity whose job drains the shared counters after each flush. Every other
    /// job records cumulative totals. Defaults to none.
    pub resetting_granularity: Option<Granularity>,
    /// The number of intervals to keep per granularity. Granularities not listed keep everything.
    pub retention: BTreeMap<Granularity, NonZeroU32>,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            granularities: Granularity::ALL.to_vec(),
            resetting_granularity: None,
            retention: BTreeMap::new(),
        }
    }
}

impl StatisticsConfig {
    pub fn from_json(json: &str) -> Result<Self, RunstatError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The job configuration for every configured granularity, in configured order.
    pub fn jobs(&self) -> Vec<JobConfig> {
        self.granularities
            .iter()
            .map(|&granularity| {
                let reset_policy = if self.resetting_granularity == Some(granularity) {
                    ResetPolicy::PerInterval
                } else {
                    ResetPolicy::Cumulative
                };
                JobConfig::new(granularity)
                    .with_reset_policy(reset_policy)
                    .with_retention(self.retention.get(&granularity).copied())
            })
            .collect()
    }

    /// Check the configuration is consistent before any job is scheduled.
    pub fn validate(&self) -> Result<(), RunstatError> {
        if let Some(granularity) = self.resetting_granularity {
            if !self.granularities.contains(&granularity) {
                return Err(RunstatError::UnscheduledResettingJob(granularity));
            }
        }
        Ok(())
    }
}
