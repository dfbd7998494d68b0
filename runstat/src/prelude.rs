//! The purpose of this module is to alleviate the need to import many of the `[runstat]` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use runstat::prelude::*;
//! ```
pub use crate::config::StatisticsConfig;
pub use crate::counters::{SharedCounters, TaskResultCounts};
pub use crate::granularity::Granularity;
pub use crate::job::{FireContext, FireError, FireOutcome, JobConfig, ResetPolicy, StatisticsJob};
pub use crate::record::TaskResultStatistics;
pub use crate::repository::{RepositoryError, StatisticsRepository};
pub use crate::schedule::{build_schedule, ScheduleBuildError, ScheduleSpec};
pub use crate::RunstatError;
pub use crate::StatisticsScheduler;
