//! Attempt log types shared by the tracker and the storage backends.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Origin recorded when the client address could not be determined.
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// The `(identity, origin)` pair every attempt, count and lockout is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptKey {
    pub identity: String,
    pub origin: String,
}

impl AttemptKey {
    /// Build a key, substituting [`UNKNOWN_ORIGIN`] for a blank origin.
    pub fn new(identity: impl Into<String>, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        let origin = if origin.trim().is_empty() {
            UNKNOWN_ORIGIN.to_string()
        } else {
            origin
        };

        Self {
            identity: identity.into(),
            origin,
        }
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identity, self.origin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Failed,
    Locked,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Locked => "locked",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AttemptStatus::Success),
            "failed" => Ok(AttemptStatus::Failed),
            "locked" => Ok(AttemptStatus::Locked),
            other => Err(StorageError::Database(format!(
                "Unknown attempt status: {other}"
            ))),
        }
    }
}

/// A persisted entry of the attempt log.
///
/// `id` is assigned by the backend in append order and is what "most recent"
/// means; timestamps may tie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: i64,
    pub identity: String,
    pub origin: String,
    pub status: AttemptStatus,
    pub timestamp: DateTime<Utc>,
    pub lockout_until: Option<DateTime<Utc>>,
    /// 1-based lockout occurrence, only set on `locked` records.
    pub occurrence: Option<u32>,
}

impl AttemptRecord {
    pub fn key(&self) -> AttemptKey {
        AttemptKey {
            identity: self.identity.clone(),
            origin: self.origin.clone(),
        }
    }

    /// Whether this is a lockout record that has not yet expired at `now`.
    pub fn is_active_lockout(&self, now: DateTime<Utc>) -> bool {
        self.status == AttemptStatus::Locked && self.lockout_until.is_some_and(|until| until > now)
    }
}

/// A record about to be appended; the backend assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttemptRecord {
    pub key: AttemptKey,
    pub status: AttemptStatus,
    pub timestamp: DateTime<Utc>,
    pub lockout_until: Option<DateTime<Utc>>,
    pub occurrence: Option<u32>,
}

impl NewAttemptRecord {
    pub fn success(key: AttemptKey, timestamp: DateTime<Utc>) -> Self {
        Self {
            key,
            status: AttemptStatus::Success,
            timestamp,
            lockout_until: None,
            occurrence: None,
        }
    }

    pub fn failed(key: AttemptKey, timestamp: DateTime<Utc>) -> Self {
        Self {
            key,
            status: AttemptStatus::Failed,
            timestamp,
            lockout_until: None,
            occurrence: None,
        }
    }

    pub fn locked(
        key: AttemptKey,
        timestamp: DateTime<Utc>,
        lockout_until: DateTime<Utc>,
        occurrence: u32,
    ) -> Self {
        Self {
            key,
            status: AttemptStatus::Locked,
            timestamp,
            lockout_until: Some(lockout_until),
            occurrence: Some(occurrence),
        }
    }
}

/// Selection applied by `query_recent` and `count_records`.
///
/// An empty `statuses` list matches every status. `after_id` is exclusive,
/// `since` is inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub statuses: Vec<AttemptStatus>,
    pub after_id: Option<i64>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl RecordFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn status(status: AttemptStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    pub fn statuses(statuses: &[AttemptStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Self::default()
        }
    }

    pub fn after(mut self, id: Option<i64>) -> Self {
        self.after_id = id;
        self
    }

    pub fn since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &AttemptRecord) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&record.status))
            && self.after_id.is_none_or(|id| record.id > id)
            && self.since.is_none_or(|since| record.timestamp >= since)
    }
}

/// An active lockout, ready to be shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutInfo {
    pub until: DateTime<Utc>,
    pub occurrence: u32,
    pub message: String,
}

impl LockoutInfo {
    /// Seconds remaining until the lockout expires, or zero if it already has.
    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> u64 {
        (self.until - now).num_seconds().max(0) as u64
    }
}

/// Summary of a pair's current standing, for dashboards and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutStatus {
    pub key: AttemptKey,
    /// Failures counted toward the next lockout.
    pub failed_attempts: u32,
    /// Lockouts since the last success.
    pub occurrence: u32,
    pub lockout: Option<LockoutInfo>,
}

impl LockoutStatus {
    pub fn unlocked(key: AttemptKey) -> Self {
        Self {
            key,
            failed_attempts: 0,
            occurrence: 0,
            lockout: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lockout.is_some()
    }

    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        self.lockout
            .as_ref()
            .map(|lockout| lockout.retry_after_seconds(now))
    }
}
