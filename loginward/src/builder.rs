//! Builder pattern for constructing LoginWard instances
//!
//! Storage must be chosen before anything else can be configured; the
//! type-state markers [`NoStorage`] and [`WithStorage`] enforce that at
//! compile time.
//!
//! # Example
//!
//! ```rust,no_run
//! use loginward::{LockoutPolicy, LoginWardBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // SQLite with auto-migration
//!     let ward = LoginWardBuilder::new()
//!         .with_sqlite("sqlite://loginward.db")
//!         .await?
//!         .with_policy(LockoutPolicy::default().with_max_failures(5))
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     // In-memory, for tests
//!     let ward = LoginWardBuilder::new().with_in_memory().build().await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use chrono::Duration;
use loginward_core::{
    ChallengeStore, Clock, InMemoryAttemptRepository, InMemoryChallengeStore, LockoutPolicy,
    SystemClock,
};

use crate::{AttemptRepository, LoginWard};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when building a LoginWard instance.
#[derive(Debug, thiserror::Error)]
pub enum LoginWardBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

// ============================================================================
// Type-State Markers
// ============================================================================

/// Marker type indicating no storage has been configured yet.
pub struct NoStorage;

/// Marker type indicating storage has been configured.
pub struct WithStorage<R: AttemptRepository> {
    repository: Arc<R>,
}

// ============================================================================
// Builder Implementation
// ============================================================================

/// A type-safe builder for constructing [`LoginWard`] instances.
///
/// # Defaults
///
/// - Policy: [`LockoutPolicy::default`] (3 failures; 15 min, 1 h, 24 h)
/// - Clock: system time
/// - Challenge store: in process memory
/// - Challenge time to live: 15 minutes
/// - Apply migrations: false
pub struct LoginWardBuilder<Storage, C: ChallengeStore = InMemoryChallengeStore> {
    storage: Storage,
    challenge_store: Arc<C>,
    policy: LockoutPolicy,
    clock: Arc<dyn Clock>,
    challenge_ttl: Option<Duration>,
    apply_migrations: bool,
}

impl Default for LoginWardBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginWardBuilder<NoStorage> {
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            challenge_store: Arc::new(InMemoryChallengeStore::new()),
            policy: LockoutPolicy::default(),
            clock: Arc::new(SystemClock),
            challenge_ttl: None,
            apply_migrations: false,
        }
    }

    fn with_storage<R: AttemptRepository>(
        self,
        repository: Arc<R>,
    ) -> LoginWardBuilder<WithStorage<R>> {
        LoginWardBuilder {
            storage: WithStorage { repository },
            challenge_store: self.challenge_store,
            policy: self.policy,
            clock: self.clock,
            challenge_ttl: self.challenge_ttl,
            apply_migrations: self.apply_migrations,
        }
    }

    /// Use a custom attempt repository.
    pub fn with_repository<R: AttemptRepository>(
        self,
        repository: Arc<R>,
    ) -> LoginWardBuilder<WithStorage<R>> {
        self.with_storage(repository)
    }

    /// Keep the attempt log in process memory. Lockouts are lost on restart
    /// and not shared between processes.
    pub fn with_in_memory(self) -> LoginWardBuilder<WithStorage<InMemoryAttemptRepository>> {
        self.with_storage(Arc::new(InMemoryAttemptRepository::new()))
    }
}

#[cfg(feature = "sqlite")]
impl LoginWardBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite::memory:" or "sqlite://path/to/db.sqlite")
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<LoginWardBuilder<WithStorage<crate::SqliteAttemptRepository>>, LoginWardBuilderError>
    {
        let storage = crate::SqliteStorage::connect(url)
            .await
            .map_err(|e| LoginWardBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_storage(Arc::new(storage.into_repository())))
    }

    /// Configure SQLite storage with an existing connection pool.
    pub fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> LoginWardBuilder<WithStorage<crate::SqliteAttemptRepository>> {
        self.with_storage(Arc::new(crate::SqliteAttemptRepository::new(pool)))
    }
}

// ============================================================================
// Configuration Methods (available after storage is configured)
// ============================================================================

impl<R: AttemptRepository, C: ChallengeStore> LoginWardBuilder<WithStorage<R>, C> {
    /// Keep issued challenges in `store`, for example one shared by every
    /// process serving the login form.
    pub fn with_challenge_store<S: ChallengeStore>(
        self,
        store: Arc<S>,
    ) -> LoginWardBuilder<WithStorage<R>, S> {
        LoginWardBuilder {
            storage: self.storage,
            challenge_store: store,
            policy: self.policy,
            clock: self.clock,
            challenge_ttl: self.challenge_ttl,
            apply_migrations: self.apply_migrations,
        }
    }

    pub fn with_policy(mut self, policy: LockoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the time source, typically with a
    /// [`ManualClock`](crate::ManualClock) in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = Some(ttl);
        self
    }

    /// Run the repository's migrations during [`build`](Self::build).
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    pub async fn build(self) -> Result<LoginWard<R, C>, LoginWardBuilderError> {
        self.policy
            .validate()
            .map_err(|e| LoginWardBuilderError::InvalidConfiguration(e.to_string()))?;

        if let Some(ttl) = self.challenge_ttl {
            if ttl <= Duration::zero() {
                return Err(LoginWardBuilderError::InvalidConfiguration(
                    "challenge time to live must be positive".to_string(),
                ));
            }
        }

        if self.apply_migrations {
            self.storage
                .repository
                .migrate()
                .await
                .map_err(|e| LoginWardBuilderError::Migration(e.to_string()))?;
        }

        LoginWard::from_parts(
            self.storage.repository,
            self.challenge_store,
            self.policy,
            self.clock,
            self.challenge_ttl,
        )
        .map_err(|e| LoginWardBuilderError::InvalidConfiguration(e.to_string()))
    }
}
