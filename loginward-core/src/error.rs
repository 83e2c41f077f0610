use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Challenge error: {0}")]
    Challenge(#[from] ChallengeError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failure threshold must be positive, got {0}")]
    InvalidThreshold(u32),

    #[error("Lockout schedule has no durations")]
    EmptySchedule,

    #[error("Lockout duration at tier {0} must be positive")]
    NonPositiveDuration(usize),

    #[error("Lockout duration at tier {0} exceeds {max} days", max = crate::policy::MAX_POLICY_DAYS)]
    DurationTooLong(usize),

    #[error("Rolling window must be positive and at most {max} days", max = crate::policy::MAX_POLICY_DAYS)]
    InvalidWindow,

    #[error("Display offset of {0} minutes is out of range")]
    InvalidOffset(i32),

    #[error("Retention period must be positive and at most {max} days", max = crate::policy::MAX_POLICY_DAYS)]
    InvalidRetention,

    #[error("Failed to parse policy settings: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("Invalid session id")]
    InvalidSession,
}

impl Error {
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Whether the failure came from a backend that could not be reached,
    /// as opposed to a query that ran and failed.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Storage(StorageError::Unavailable(_)))
    }
}
