//! Test suite for ensuring a correct implementation of a repository.
use chrono::{DateTime, TimeZone, Utc};

use super::StatisticsRepository;
use crate::{
    bucketing, counters::TaskResultCounts, granularity::Granularity, record::TaskResultStatistics,
};

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 20, 10, 0, 0).unwrap()
}

fn record(
    granularity: Granularity,
    intervals_from_base: i64,
    success: u64,
) -> TaskResultStatistics {
    TaskResultStatistics::new(
        TaskResultCounts {
            running: 1,
            success,
            failed: 0,
        },
        granularity,
        bucketing::shift(base(), granularity, intervals_from_base).unwrap(),
    )
}

/// Create test suite for runstat repositories.
///
/// For repository implementors, it is useful to include this as part of your test suites.
///
/// # Example
///
/// ```
/// use runstat::repository_test_suite;
/// use runstat::repository::memory::InMemoryRepository;
/// repository_test_suite!(for: InMemoryRepository::new());
/// ```
///
/// If you are using a different async test attribute you can configure the macro to use that
/// instead. For example when using `sqlx::test` you could do the following:
///
/// ```ignore
/// use runstat::repository_test_suite;
/// repository_test_suite!(
///     attr: sqlx::test,
///     args: (pool: PgPool),
///     repository: RepositoryImplementation::from_pool(pool).await.unwrap()
/// );
/// ```
#[macro_export]
macro_rules! repository_test_suite {
    (for: $repository:expr) => {
        $crate::repository_test_suite!(attr: tokio::test, args: (), repository: $repository);
    };
    (attr: $attr:meta, args: $args:tt, repository: $repository:expr) => {
        #[$attr]
        async fn find_latest_when_empty $args {
            let repository = $repository;
            $crate::repository::testing::find_latest_when_empty(repository).await;
        }
        #[$attr]
        async fn insert_then_find_latest $args {
            let repository = $repository;
            $crate::repository::testing::insert_then_find_latest(repository).await;
        }
        #[$attr]
        async fn find_latest_returns_latest_interval_start $args {
            let repository = $repository;
            $crate::repository::testing::find_latest_returns_latest_interval_start(repository)
                .await;
        }
        #[$attr]
        async fn find_latest_is_partitioned_by_granularity $args {
            let repository = $repository;
            $crate::repository::testing::find_latest_is_partitioned_by_granularity(repository)
                .await;
        }
        #[$attr]
        async fn insert_duplicate_is_rejected $args {
            let repository = $repository;
            $crate::repository::testing::insert_duplicate_is_rejected(repository).await;
        }
        #[$attr]
        async fn find_since_returns_ordered_range $args {
            let repository = $repository;
            $crate::repository::testing::find_since_returns_ordered_range(repository).await;
        }
        #[$attr]
        async fn delete_before_removes_only_older_records $args {
            let repository = $repository;
            $crate::repository::testing::delete_before_removes_only_older_records(repository).await;
        }
    };
}

#[doc(hidden)]
pub async fn find_latest_when_empty(repository: impl StatisticsRepository) {
    for granularity in Granularity::iter() {
        let latest = repository.find_latest(granularity).await.unwrap();
        assert!(latest.is_none());
    }
}

#[doc(hidden)]
pub async fn insert_then_find_latest(repository: impl StatisticsRepository) {
    let record = record(Granularity::Minute, 0, 5);

    let inserted = repository.insert(record.clone()).await.unwrap();
    let latest = repository.find_latest(Granularity::Minute).await.unwrap();

    assert!(inserted);
    assert_eq!(latest, Some(record));
}

#[doc(hidden)]
pub async fn find_latest_returns_latest_interval_start(repository: impl StatisticsRepository) {
    for intervals in [2, -1, 5, 0, 3] {
        repository
            .insert(record(Granularity::Hour, intervals, 0))
            .await
            .unwrap();
    }

    let latest = repository.find_latest(Granularity::Hour).await.unwrap().unwrap();

    assert_eq!(
        latest.interval_start(),
        bucketing::shift(base(), Granularity::Hour, 5).unwrap()
    );
}

#[doc(hidden)]
pub async fn find_latest_is_partitioned_by_granularity(repository: impl StatisticsRepository) {
    repository
        .insert(record(Granularity::Second, 10, 1))
        .await
        .unwrap();
    repository
        .insert(record(Granularity::Day, -2, 2))
        .await
        .unwrap();

    let second = repository.find_latest(Granularity::Second).await.unwrap().unwrap();
    let day = repository.find_latest(Granularity::Day).await.unwrap().unwrap();
    let minute = repository.find_latest(Granularity::Minute).await.unwrap();

    assert_eq!(second.granularity(), Granularity::Second);
    assert_eq!(second.success_count(), 1);
    assert_eq!(day.granularity(), Granularity::Day);
    assert_eq!(day.success_count(), 2);
    assert!(minute.is_none());
}

#[doc(hidden)]
pub async fn insert_duplicate_is_rejected(repository: impl StatisticsRepository) {
    let original = record(Granularity::Minute, 0, 1);
    let duplicate = record(Granularity::Minute, 0, 99);

    assert!(repository.insert(original.clone()).await.unwrap());
    assert!(!repository.insert(duplicate).await.unwrap());

    let stored = repository
        .find_since(Granularity::Minute, base())
        .await
        .unwrap();
    assert_eq!(stored, vec![original]);
}

#[doc(hidden)]
pub async fn find_since_returns_ordered_range(repository: impl StatisticsRepository) {
    for intervals in [3, -2, 1, 0, 2, -1] {
        repository
            .insert(record(Granularity::Minute, intervals, intervals.unsigned_abs()))
            .await
            .unwrap();
    }
    repository
        .insert(record(Granularity::Second, 1, 0))
        .await
        .unwrap();

    let found = repository
        .find_since(Granularity::Minute, base())
        .await
        .unwrap();

    let starts = found
        .iter()
        .map(TaskResultStatistics::interval_start)
        .collect::<Vec<_>>();
    let expected = (0..=3)
        .map(|i| bucketing::shift(base(), Granularity::Minute, i).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(starts, expected);
    assert!(found
        .iter()
        .all(|record| record.granularity() == Granularity::Minute));
}

#[doc(hidden)]
pub async fn delete_before_removes_only_older_records(repository: impl StatisticsRepository) {
    for intervals in -3..=1 {
        repository
            .insert(record(Granularity::Hour, intervals, 0))
            .await
            .unwrap();
    }
    repository
        .insert(record(Granularity::Day, -10, 0))
        .await
        .unwrap();

    let deleted = repository
        .delete_before(Granularity::Hour, base())
        .await
        .unwrap();

    assert_eq!(deleted, 3);
    let remaining = repository
        .find_since(
            Granularity::Hour,
            bucketing::shift(base(), Granularity::Day, -30).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0].interval_start(), base());
    assert!(repository
        .find_latest(Granularity::Day)
        .await
        .unwrap()
        .is_some());
}
