//! In-process attempt log.
//!
//! Useful for single-node deployments and tests. Records are lost on restart.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    error::StorageError,
    repositories::AttemptRepository,
    storage::{AttemptKey, AttemptRecord, NewAttemptRecord, RecordFilter},
};

#[derive(Debug, Default)]
struct AttemptLog {
    next_id: i64,
    records: Vec<AttemptRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryAttemptRepository {
    log: Mutex<AttemptLog>,
}

impl InMemoryAttemptRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held, across all pairs.
    pub fn len(&self) -> usize {
        self.log.lock().map(|log| log.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the whole log in append order.
    pub fn snapshot(&self) -> Vec<AttemptRecord> {
        self.log
            .lock()
            .map(|log| log.records.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, AttemptLog>, Error> {
        self.log.lock().map_err(|_| {
            tracing::error!("In-memory attempt log mutex poisoned");
            Error::Storage(StorageError::Unavailable(
                "In-memory attempt log is poisoned".to_string(),
            ))
        })
    }
}

fn belongs_to(record: &AttemptRecord, key: &AttemptKey) -> bool {
    record.identity == key.identity && record.origin == key.origin
}

#[async_trait]
impl AttemptRepository for InMemoryAttemptRepository {
    async fn append_record(&self, record: NewAttemptRecord) -> Result<AttemptRecord, Error> {
        let mut log = self.lock()?;
        log.next_id += 1;
        let record = AttemptRecord {
            id: log.next_id,
            identity: record.key.identity,
            origin: record.key.origin,
            status: record.status,
            timestamp: record.timestamp,
            lockout_until: record.lockout_until,
            occurrence: record.occurrence,
        };
        log.records.push(record.clone());
        Ok(record)
    }

    async fn query_recent(
        &self,
        key: &AttemptKey,
        filter: &RecordFilter,
    ) -> Result<Vec<AttemptRecord>, Error> {
        let log = self.lock()?;
        let limit = filter.limit.map(|l| l as usize).unwrap_or(usize::MAX);

        Ok(log
            .records
            .iter()
            .rev()
            .filter(|r| belongs_to(r, key) && filter.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_records(&self, key: &AttemptKey, filter: &RecordFilter) -> Result<u64, Error> {
        let log = self.lock()?;
        Ok(log
            .records
            .iter()
            .filter(|r| belongs_to(r, key) && filter.matches(r))
            .count() as u64)
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let mut log = self.lock()?;
        let before_len = log.records.len();

        // A pair keeps everything from its first lockout still in force, so
        // later unlocks and successes go on overriding it.
        let mut kept_from: HashMap<AttemptKey, i64> = HashMap::new();
        for record in log.records.iter().filter(|r| r.is_active_lockout(before)) {
            kept_from
                .entry(record.key())
                .and_modify(|id| *id = (*id).min(record.id))
                .or_insert(record.id);
        }

        log.records.retain(|r| {
            r.timestamp >= before || kept_from.get(&r.key()).is_some_and(|id| r.id >= *id)
        });
        Ok((before_len - log.records.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), Error> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::AttemptStatus;
    use chrono::Duration;

    fn key(identity: &str) -> AttemptKey {
        AttemptKey::new(identity, "10.0.0.1")
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let repo = InMemoryAttemptRepository::new();
        let now = Utc::now();

        let first = repo
            .append_record(NewAttemptRecord::failed(key("alice"), now))
            .await
            .unwrap();
        let second = repo
            .append_record(NewAttemptRecord::failed(key("alice"), now))
            .await
            .unwrap();

        assert!(second.id > first.id);
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn test_query_recent_is_newest_first_and_scoped_to_pair() {
        let repo = InMemoryAttemptRepository::new();
        let now = Utc::now();

        repo.append_record(NewAttemptRecord::failed(key("alice"), now))
            .await
            .unwrap();
        repo.append_record(NewAttemptRecord::failed(key("bob"), now))
            .await
            .unwrap();
        repo.append_record(NewAttemptRecord::success(key("alice"), now))
            .await
            .unwrap();

        let records = repo
            .query_recent(&key("alice"), &RecordFilter::any())
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, AttemptStatus::Success);
        assert_eq!(records[1].status, AttemptStatus::Failed);

        let latest = repo
            .query_recent(&key("alice"), &RecordFilter::any().limit(1))
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].status, AttemptStatus::Success);

        // Same identity from another origin is a different pair
        let other_origin = AttemptKey::new("alice", "10.0.0.2");
        assert_eq!(
            repo.count_records(&other_origin, &RecordFilter::any())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_cleanup_keeps_active_lockouts() {
        let repo = InMemoryAttemptRepository::new();
        let old = Utc::now() - Duration::days(30);

        repo.append_record(NewAttemptRecord::failed(key("alice"), old))
            .await
            .unwrap();
        repo.append_record(NewAttemptRecord::locked(
            key("alice"),
            old,
            old + Duration::days(60),
            1,
        ))
        .await
        .unwrap();
        repo.append_record(NewAttemptRecord::failed(key("bob"), Utc::now()))
            .await
            .unwrap();

        let deleted = repo
            .cleanup_before(Utc::now() - Duration::days(7))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        let remaining = repo.snapshot();
        assert_eq!(remaining.len(), 2);
        assert!(
            remaining
                .iter()
                .any(|r| r.status == AttemptStatus::Locked && r.identity == "alice")
        );
    }

    #[tokio::test]
    async fn test_cleanup_keeps_records_after_active_lockout() {
        let repo = InMemoryAttemptRepository::new();
        let start = Utc::now() - Duration::days(9);

        for _ in 0..3 {
            repo.append_record(NewAttemptRecord::failed(key("alice"), start))
                .await
                .unwrap();
        }
        repo.append_record(NewAttemptRecord::locked(
            key("alice"),
            start,
            start + Duration::days(30),
            1,
        ))
        .await
        .unwrap();
        repo.append_record(NewAttemptRecord::success(
            key("alice"),
            start + Duration::days(1),
        ))
        .await
        .unwrap();

        let deleted = repo
            .cleanup_before(Utc::now() - Duration::days(7))
            .await
            .unwrap();

        assert_eq!(deleted, 3);
        let latest = repo
            .query_recent(
                &key("alice"),
                &RecordFilter::statuses(&[AttemptStatus::Locked, AttemptStatus::Success])
                    .limit(1),
            )
            .await
            .unwrap();
        assert_eq!(latest[0].status, AttemptStatus::Success);
    }
}
