//! Schema migrations for the SQLite attempt log.
//!
//! Applied versions are tracked in `_loginward_migrations`; each pending
//! migration runs in its own transaction.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

#[async_trait]
pub trait SqliteMigration: Send + Sync {
    async fn up(&self, conn: &mut SqliteConnection) -> Result<()>;

    async fn down(&self, conn: &mut SqliteConnection) -> Result<()>;

    /// Unique version number for ordering migrations
    fn version(&self) -> i64;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: i64,
}

const MIGRATIONS_TABLE: &str = "_loginward_migrations";

pub struct SqliteMigrationManager {
    pool: SqlitePool,
}

impl SqliteMigrationManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            );"#
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn up(&self, migrations: &[Box<dyn SqliteMigration>]) -> Result<()> {
        for migration in migrations {
            if self.is_applied(migration.version()).await? {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Applying migration"
            );

            migration.up(&mut *tx).await?;

            sqlx::query(&format!(
                "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at) VALUES (?, ?, ?)"
            ))
            .bind(migration.version())
            .bind(migration.name())
            .bind(Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }

        Ok(())
    }

    /// Roll back applied migrations, newest first.
    pub async fn down(&self, migrations: &[Box<dyn SqliteMigration>]) -> Result<()> {
        for migration in migrations.iter().rev() {
            if !self.is_applied(migration.version()).await? {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Rolling back migration"
            );

            migration.down(&mut *tx).await?;

            sqlx::query(&format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?"))
                .bind(migration.version())
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
        }

        Ok(())
    }

    pub async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>> {
        let records = sqlx::query_as::<_, MigrationRecord>(&format!(
            "SELECT version, name, applied_at FROM {MIGRATIONS_TABLE} ORDER BY version"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn is_applied(&self, version: i64) -> Result<bool> {
        let applied: Option<(i64,)> = sqlx::query_as(&format!(
            "SELECT version FROM {MIGRATIONS_TABLE} WHERE version = ?"
        ))
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(applied.is_some())
    }
}

pub struct CreateLoginAttemptsTable;

#[async_trait]
impl SqliteMigration for CreateLoginAttemptsTable {
    async fn up(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS login_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity TEXT NOT NULL,
                origin TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('success', 'failed', 'locked')),
                attempted_at INTEGER NOT NULL,
                lockout_until INTEGER,
                occurrence INTEGER
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS login_attempts")
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    fn version(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "CreateLoginAttemptsTable"
    }
}

pub struct CreateLoginAttemptIndexes;

#[async_trait]
impl SqliteMigration for CreateLoginAttemptIndexes {
    async fn up(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_login_attempts_pair ON login_attempts (identity, origin, status, id)",
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_login_attempts_attempted_at ON login_attempts (attempted_at)",
        )
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("DROP INDEX IF EXISTS idx_login_attempts_pair")
            .execute(&mut *conn)
            .await?;
        sqlx::query("DROP INDEX IF EXISTS idx_login_attempts_attempted_at")
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    fn version(&self) -> i64 {
        2
    }

    fn name(&self) -> &str {
        "CreateLoginAttemptIndexes"
    }
}

/// Every migration of the attempt log schema, in order.
pub fn all() -> Vec<Box<dyn SqliteMigration>> {
    vec![
        Box::new(CreateLoginAttemptsTable),
        Box::new(CreateLoginAttemptIndexes),
    ]
}
