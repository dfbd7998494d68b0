//! The granularities at which statistics are recorded.
//!
//! Each [`Granularity`] maps to exactly one fixed interval length, one boundary alignment rule,
//! and one cron expression firing on every boundary. See [`crate::bucketing`] for the timestamp
//! arithmetic built on top of these.
use std::{fmt::Display, str::FromStr};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::schedule::ScheduleBuildError;

/// The size of the time bucket a statistics record covers.
///
/// The variants are ordered by the length of their interval.
///
/// # Example
///
/// ```
/// use runstat::granularity::Granularity;
///
/// assert_eq!(Granularity::Minute.to_string(), "MINUTE");
/// assert_eq!("HOUR".parse::<Granularity>().unwrap(), Granularity::Hour);
/// assert!(Granularity::Second < Granularity::Day);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
}

impl Granularity {
    /// Every supported granularity, shortest interval first.
    pub const ALL: [Granularity; 4] = [Self::Second, Self::Minute, Self::Hour, Self::Day];

    /// Iterate over every supported granularity, shortest interval first.
    pub fn iter() -> impl Iterator<Item = Granularity> {
        Self::ALL.into_iter()
    }

    /// The length of a single interval.
    pub fn duration(self) -> TimeDelta {
        TimeDelta::seconds(self.seconds())
    }

    pub(crate) const fn seconds(self) -> i64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 60 * 60,
            Self::Day => 24 * 60 * 60,
        }
    }

    /// The name used for display, storage, and job naming.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Second => "SECOND",
            Self::Minute => "MINUTE",
            Self::Hour => "HOUR",
            Self::Day => "DAY",
        }
    }

    /// A cron expression (with a seconds field) matching every boundary of this granularity.
    pub const fn cron_expression(self) -> &'static str {
        match self {
            Self::Second => "* * * * * *",
            Self::Minute => "0 * * * * *",
            Self::Hour => "0 0 * * * *",
            Self::Day => "0 0 0 * * *",
        }
    }
}

impl Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ScheduleBuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::iter()
            .find(|granularity| granularity.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ScheduleBuildError::UnknownGranularity(s.to_owned()))
    }
}
