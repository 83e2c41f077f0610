//! SQLite storage backend for loginward
//!
//! Stores the attempt log in a `login_attempts` table and manages its own
//! schema through [`migrations`].
//!
//! ```rust,no_run
//! use loginward_core::AttemptRepository;
//! use loginward_storage_sqlite::SqliteStorage;
//!
//! # async fn run() -> Result<(), loginward_core::Error> {
//! let storage = SqliteStorage::connect("sqlite://loginward.db").await?;
//! let repository = storage.into_repository();
//! repository.migrate().await?;
//! # Ok(())
//! # }
//! ```
pub mod migrations;
pub mod repositories;

use std::str::FromStr;

use loginward_core::{Error, error::StorageError};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub use repositories::SqliteAttemptRepository;

/// Owner of the connection pool the attempt repository runs on.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `database_url`, creating the database file if needed.
    ///
    /// In-memory databases get a single connection so every query sees the
    /// same database.
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| {
                tracing::error!(error = %e, "Invalid SQLite database URL");
                StorageError::Database(format!("Invalid database URL: {e}"))
            })?
            .create_if_missing(true);

        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to SQLite");
                StorageError::Unavailable(format!("Failed to connect to database: {e}"))
            })?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn into_repository(self) -> SqliteAttemptRepository {
        SqliteAttemptRepository::new(self.pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loginward_core::AttemptRepository;

    #[tokio::test]
    async fn test_connect_in_memory() {
        let storage = SqliteStorage::connect("sqlite::memory:").await.unwrap();
        let repository = storage.into_repository();
        repository.migrate().await.unwrap();
        assert!(repository.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_fails_for_unreachable_path() {
        let err = SqliteStorage::connect("sqlite:///nonexistent-dir/loginward/attempts.db")
            .await
            .err()
            .unwrap();
        assert!(err.is_storage_error());
    }
}
