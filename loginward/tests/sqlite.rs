//! Login flows backed by SQLite
#![cfg(feature = "sqlite")]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use loginward::{
    Clock, LockoutPolicy, LoginAttempt, LoginWard, LoginWardBuilder, ManualClock,
    SqliteAttemptRepository, Verdict,
};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

const ORIGIN: &str = "198.51.100.23";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 8, 30, 0).unwrap()
}

async fn pool() -> SqlitePool {
    let _ = tracing_subscriber::fmt::try_init();
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create pool")
}

async fn ward(
    pool: SqlitePool,
    clock: Arc<ManualClock>,
) -> LoginWard<SqliteAttemptRepository> {
    LoginWardBuilder::new()
        .with_sqlite_pool(pool)
        .with_clock(clock)
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build LoginWard")
}

#[tokio::test]
async fn test_lockout_and_escalation() {
    let clock = Arc::new(ManualClock::new(start()));
    let ward = ward(pool().await, clock.clone()).await;

    for _ in 0..2 {
        ward.record_failure("alice", ORIGIN).await.unwrap();
    }
    assert!(ward.is_locked("alice", ORIGIN).await.unwrap().is_none());

    let outcome = ward.record_failure("alice", ORIGIN).await.unwrap();
    let first = outcome.lockout.expect("third failure should lock");
    assert_eq!(first.until, start() + Duration::minutes(15));

    let verdict = ward
        .check_attempt(&LoginAttempt::new("alice", ORIGIN))
        .await
        .unwrap()
        .into_verdict();
    assert!(matches!(verdict, Verdict::RejectLocked { until, .. } if until == first.until));

    clock.advance(Duration::minutes(15));
    assert!(ward.is_locked("alice", ORIGIN).await.unwrap().is_none());

    for _ in 0..3 {
        ward.record_failure("alice", ORIGIN).await.unwrap();
    }
    let second = ward.is_locked("alice", ORIGIN).await.unwrap().unwrap();
    assert_eq!(second.until - clock.now(), Duration::hours(1));
    assert_eq!(second.occurrence, 2);
}

#[tokio::test]
async fn test_success_resets_escalation() {
    let clock = Arc::new(ManualClock::new(start()));
    let ward = ward(pool().await, clock.clone()).await;

    for _ in 0..3 {
        ward.record_failure("alice", ORIGIN).await.unwrap();
    }
    clock.advance(Duration::minutes(20));
    ward.record_success("alice", ORIGIN).await.unwrap();

    for _ in 0..3 {
        ward.record_failure("alice", ORIGIN).await.unwrap();
    }
    let lockout = ward.is_locked("alice", ORIGIN).await.unwrap().unwrap();
    assert_eq!(lockout.occurrence, 1);
    assert_eq!(lockout.until, clock.now() + Duration::minutes(15));
}

#[tokio::test]
async fn test_lockout_survives_new_instance() {
    let pool = pool().await;
    let clock = Arc::new(ManualClock::new(start()));

    let first = ward(pool.clone(), clock.clone()).await;
    for _ in 0..3 {
        first.record_failure("alice", ORIGIN).await.unwrap();
    }
    drop(first);

    let second = ward(pool, clock.clone()).await;
    let lockout = second.is_locked("alice", ORIGIN).await.unwrap();
    assert_eq!(
        lockout.map(|l| l.until),
        Some(start() + Duration::minutes(15))
    );
}

#[tokio::test]
async fn test_pairs_are_independent() {
    let clock = Arc::new(ManualClock::new(start()));
    let ward = ward(pool().await, clock).await;

    for _ in 0..3 {
        ward.record_failure("alice", ORIGIN).await.unwrap();
    }

    assert!(ward.is_locked("alice", ORIGIN).await.unwrap().is_some());
    assert!(ward.is_locked("alice", "192.0.2.1").await.unwrap().is_none());
    assert!(ward.is_locked("bob", ORIGIN).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rolling_window_ignores_old_failures() {
    let clock = Arc::new(ManualClock::new(start()));
    let ward = LoginWardBuilder::new()
        .with_sqlite_pool(pool().await)
        .with_clock(clock.clone())
        .with_policy(
            LockoutPolicy::default()
                .with_window(loginward::FailureWindow::Rolling(Duration::minutes(10))),
        )
        .apply_migrations(true)
        .build()
        .await
        .unwrap();

    ward.record_failure("alice", ORIGIN).await.unwrap();
    ward.record_failure("alice", ORIGIN).await.unwrap();
    clock.advance(Duration::minutes(11));

    let outcome = ward.record_failure("alice", ORIGIN).await.unwrap();
    assert!(!outcome.triggered_lockout());
    assert_eq!(outcome.failed_attempts, 1);
}

#[tokio::test]
async fn test_closed_pool_fails_open_by_default() {
    let pool = pool().await;
    let clock = Arc::new(ManualClock::new(start()));
    let ward = ward(pool.clone(), clock).await;
    let challenge = ward.issue_challenge("s1").await.unwrap();

    pool.close().await;

    let attempt = LoginAttempt::new("alice", ORIGIN)
        .with_session("s1")
        .with_challenge_answer(challenge.answer().to_string());
    let evaluation = ward.check_attempt(&attempt).await.unwrap();

    assert_eq!(evaluation.verdict, Verdict::Allow);
    assert!(evaluation.is_degraded());
    assert!(ward.health_check().await.is_err());
}

#[tokio::test]
async fn test_closed_pool_fails_closed_when_configured() {
    let pool = pool().await;
    let ward = LoginWardBuilder::new()
        .with_sqlite_pool(pool.clone())
        .with_policy(
            LockoutPolicy::default().with_lookup_failure(loginward::LookupFailureMode::FailClosed),
        )
        .apply_migrations(true)
        .build()
        .await
        .unwrap();

    pool.close().await;

    let result = ward.check_attempt(&LoginAttempt::new("alice", ORIGIN)).await;
    assert!(matches!(result, Err(loginward::LoginWardError::StorageError(_))));
}
