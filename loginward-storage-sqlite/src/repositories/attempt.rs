//! SQLite implementation of the attempt log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loginward_core::{
    Error,
    error::StorageError,
    repositories::AttemptRepository,
    storage::{AttemptKey, AttemptRecord, AttemptStatus, NewAttemptRecord, RecordFilter},
};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::migrations::{SqliteMigrationManager, all as all_migrations};

const RECORD_COLUMNS: &str =
    "id, identity, origin, status, attempted_at, lockout_until, occurrence";

/// SQLite repository for the append-only attempt log.
///
/// Timestamps are stored as Unix milliseconds.
#[derive(Clone)]
pub struct SqliteAttemptRepository {
    pool: SqlitePool,
}

impl SqliteAttemptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Internal struct for query results
#[derive(Debug, sqlx::FromRow)]
struct SqliteAttemptRecord {
    id: i64,
    identity: String,
    origin: String,
    status: String,
    attempted_at: i64,
    lockout_until: Option<i64>,
    occurrence: Option<i64>,
}

impl TryFrom<SqliteAttemptRecord> for AttemptRecord {
    type Error = StorageError;

    fn try_from(row: SqliteAttemptRecord) -> Result<Self, Self::Error> {
        let occurrence = row
            .occurrence
            .map(|n| {
                u32::try_from(n)
                    .map_err(|_| StorageError::Database(format!("Invalid occurrence: {n}")))
            })
            .transpose()?;

        Ok(AttemptRecord {
            id: row.id,
            identity: row.identity,
            origin: row.origin,
            status: row.status.parse()?,
            timestamp: from_millis(row.attempted_at)?,
            lockout_until: row.lockout_until.map(from_millis).transpose()?,
            occurrence,
        })
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::Database(format!("Invalid timestamp: {millis}")))
}

/// Connection-level failures become `Unavailable` so the gate can apply its
/// lookup-failure policy; everything else is a plain database error.
fn storage_error(e: sqlx::Error, context: &str) -> StorageError {
    tracing::error!(error = %e, "{context}");
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StorageError::Unavailable(context.to_string())
        }
        _ => StorageError::Database(context.to_string()),
    }
}

/// Append the pair and filter conditions to a query that already has a
/// `WHERE` clause open.
fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, key: &AttemptKey, filter: &RecordFilter) {
    builder
        .push(" identity = ")
        .push_bind(key.identity.clone())
        .push(" AND origin = ")
        .push_bind(key.origin.clone());

    if !filter.statuses.is_empty() {
        builder.push(" AND status IN (");
        let mut separated = builder.separated(", ");
        for status in &filter.statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");
    }

    if let Some(after_id) = filter.after_id {
        builder.push(" AND id > ").push_bind(after_id);
    }

    if let Some(since) = filter.since {
        builder
            .push(" AND attempted_at >= ")
            .push_bind(since.timestamp_millis());
    }
}

#[async_trait]
impl AttemptRepository for SqliteAttemptRepository {
    async fn append_record(&self, record: NewAttemptRecord) -> Result<AttemptRecord, Error> {
        let row = sqlx::query_as::<_, SqliteAttemptRecord>(&format!(
            r#"
            INSERT INTO login_attempts (identity, origin, status, attempted_at, lockout_until, occurrence)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(&record.key.identity)
        .bind(&record.key.origin)
        .bind(record.status.as_str())
        .bind(record.timestamp.timestamp_millis())
        .bind(record.lockout_until.map(|until| until.timestamp_millis()))
        .bind(record.occurrence.map(i64::from))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error(e, "Failed to append login attempt"))?;

        Ok(AttemptRecord::try_from(row)?)
    }

    async fn query_recent(
        &self,
        key: &AttemptKey,
        filter: &RecordFilter,
    ) -> Result<Vec<AttemptRecord>, Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {RECORD_COLUMNS} FROM login_attempts WHERE"
        ));
        push_filter(&mut builder, key, filter);
        builder.push(" ORDER BY id DESC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = builder
            .build_query_as::<SqliteAttemptRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error(e, "Failed to query login attempts"))?;

        rows.into_iter()
            .map(|row| AttemptRecord::try_from(row).map_err(Error::from))
            .collect()
    }

    async fn count_records(&self, key: &AttemptKey, filter: &RecordFilter) -> Result<u64, Error> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM login_attempts WHERE");
        push_filter(&mut builder, key, filter);

        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error(e, "Failed to count login attempts"))?;

        Ok(count.max(0) as u64)
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let before_millis = before.timestamp_millis();

        // Rows at or after a lockout still in force for the same pair stay.
        let result = sqlx::query(
            r#"
            DELETE FROM login_attempts
            WHERE attempted_at < ?
              AND NOT EXISTS (
                  SELECT 1 FROM login_attempts AS kept
                  WHERE kept.identity = login_attempts.identity
                    AND kept.origin = login_attempts.origin
                    AND kept.status = ?
                    AND kept.lockout_until > ?
                    AND kept.id <= login_attempts.id
              )
            "#,
        )
        .bind(before_millis)
        .bind(AttemptStatus::Locked.as_str())
        .bind(before_millis)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error(e, "Failed to clean up login attempts"))?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error(e, "Health check failed"))?;

        Ok(())
    }

    /// Create or upgrade the `login_attempts` schema.
    async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            StorageError::Migration(e.to_string())
        })?;

        manager.up(&all_migrations()).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            StorageError::Migration(e.to_string())
        })?;

        Ok(())
    }
}
