//! Boundary aligned timestamp arithmetic.
//!
//! All functions here are pure. Timestamps are aligned in UTC: a [`Granularity::Day`] interval
//! starts at UTC midnight, an hour at `:00:00`, a minute at `:00`, and a second drops its
//! sub-second part.
//!
//! Shifting by days uses calendar arithmetic ([`chrono::Days`]) while the shorter granularities
//! shift by their fixed length. In UTC both give the same answer, however the calendar path keeps
//! day boundaries independent of the seconds in a day.
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use runstat::{bucketing, granularity::Granularity};
//!
//! let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 17, 42).unwrap();
//! let start = bucketing::aligned_start(now, Granularity::Hour);
//!
//! assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
//! assert_eq!(
//!     bucketing::shift(start, Granularity::Hour, -3),
//!     Some(Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap())
//! );
//! assert_eq!(bucketing::intervals_between(start, now, Granularity::Minute), 17);
//! ```
use chrono::{DateTime, Days, NaiveTime, TimeDelta, Timelike, Utc};

use crate::granularity::Granularity;

/// The latest interval boundary at or before `now`.
pub fn aligned_start(now: DateTime<Utc>, granularity: Granularity) -> DateTime<Utc> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    let unit = granularity.seconds();
    let elapsed = i64::from(now.num_seconds_from_midnight());
    // midnight plus less than a day never exceeds `now`, so this cannot overflow.
    midnight + TimeDelta::seconds(elapsed - elapsed % unit)
}

/// The interval boundary `intervals` whole intervals after the interval containing `timestamp`.
///
/// A negative count moves backwards in time. The result is always aligned, even when `timestamp`
/// is not. Returns [`None`] only when the result is outside the range chrono can represent.
pub fn shift(
    timestamp: DateTime<Utc>,
    granularity: Granularity,
    intervals: i64,
) -> Option<DateTime<Utc>> {
    let start = aligned_start(timestamp, granularity);
    match granularity {
        Granularity::Day => {
            let days = Days::new(intervals.unsigned_abs());
            if intervals >= 0 {
                start.checked_add_days(days)
            } else {
                start.checked_sub_days(days)
            }
        }
        Granularity::Second | Granularity::Minute | Granularity::Hour => {
            let delta = TimeDelta::try_seconds(granularity.seconds().checked_mul(intervals)?)?;
            start.checked_add_signed(delta)
        }
    }
}

/// The number of interval boundaries crossed going from `from` to `to`.
///
/// Both timestamps are aligned first, so this counts whole intervals between the buckets
/// containing each of them. The result is negative when `to` is in an earlier bucket than `from`.
pub fn intervals_between(from: DateTime<Utc>, to: DateTime<Utc>, granularity: Granularity) -> i64 {
    let from = aligned_start(from, granularity);
    let to = aligned_start(to, granularity);
    match granularity {
        Granularity::Day => to
            .date_naive()
            .signed_duration_since(from.date_naive())
            .num_days(),
        Granularity::Second | Granularity::Minute | Granularity::Hour => {
            to.signed_duration_since(from).num_seconds() / granularity.seconds()
        }
    }
}

/// Whether `timestamp` already sits on a boundary of `granularity`.
pub fn is_aligned(timestamp: DateTime<Utc>, granularity: Granularity) -> bool {
    aligned_start(timestamp, granularity) == timestamp
}
