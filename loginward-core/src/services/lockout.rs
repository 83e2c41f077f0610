//! Lockout tracking for `(identity, origin)` pairs.
//!
//! The tracker keeps no counters of its own. Every decision is derived from
//! the append-only attempt log:
//!
//! - a pair is locked while its most recent `locked`-or-`success` record is a
//!   `locked` record whose `lockout_until` lies in the future;
//! - failures count toward the threshold when they were appended after the
//!   latest `success` or `locked` record (and, for a rolling window, are
//!   recent enough);
//! - the lockout occurrence is the number of `locked` records since the latest
//!   `success`, so escalation resets on a successful login.
//!
//! # Example
//!
//! ```rust,ignore
//! use loginward_core::services::LockoutTracker;
//!
//! let tracker = LockoutTracker::new(repository, LockoutPolicy::default(), clock)?;
//!
//! // After the credential check fails
//! let outcome = tracker.record_failure("alice", "203.0.113.7").await?;
//! if let Some(lockout) = outcome.lockout {
//!     // Pair is now locked until lockout.until
//! }
//! ```

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{
    Error,
    clock::Clock,
    policy::LockoutPolicy,
    repositories::AttemptRepository,
    storage::{
        AttemptKey, AttemptRecord, AttemptStatus, LockoutInfo, LockoutStatus, NewAttemptRecord,
        RecordFilter,
    },
};

/// Result of recording a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureOutcome {
    /// Failures counted toward the threshold, including this one.
    pub failed_attempts: u32,
    /// Set when this failure moved the pair into a lockout.
    pub lockout: Option<LockoutInfo>,
}

impl FailureOutcome {
    fn not_locked(failed_attempts: u32) -> Self {
        Self {
            failed_attempts,
            lockout: None,
        }
    }

    pub fn triggered_lockout(&self) -> bool {
        self.lockout.is_some()
    }
}

/// What the log says about one pair at a point in time.
#[derive(Debug, Default)]
struct PairHistory {
    failed_attempts: u32,
    occurrence: u32,
    latest_lockout: Option<AttemptRecord>,
}

/// Derives lockout state from the attempt log and appends new outcomes.
///
/// # Thread Safety
///
/// Writes for one pair are serialized by a per-pair async mutex, so the
/// append-count-lock sequence in [`record_failure`](Self::record_failure) is
/// atomic with respect to other writes for the same pair. Different pairs never
/// wait on each other. The guarantee holds within one process; backends shared
/// between processes need their own serialization.
pub struct LockoutTracker<R: AttemptRepository> {
    repository: Arc<R>,
    policy: RwLock<Arc<LockoutPolicy>>,
    clock: Arc<dyn Clock>,
    key_locks: DashMap<AttemptKey, Arc<Mutex<()>>>,
}

impl<R: AttemptRepository> LockoutTracker<R> {
    /// Create a tracker, refusing policies that fail validation.
    pub fn new(
        repository: Arc<R>,
        policy: LockoutPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        policy.validate()?;

        Ok(Self {
            repository,
            policy: RwLock::new(Arc::new(policy)),
            clock,
            key_locks: DashMap::new(),
        })
    }

    /// The policy currently in force.
    pub fn policy(&self) -> Arc<LockoutPolicy> {
        Arc::clone(&self.policy.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Replace the policy. The old policy stays in force if the new one is
    /// invalid.
    pub fn reload_policy(&self, policy: LockoutPolicy) -> Result<(), Error> {
        policy.validate()?;
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(policy);
        tracing::info!("Lockout policy reloaded");
        Ok(())
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The active lockout for the pair, if any.
    ///
    /// This is a pure read: calling it repeatedly without an intervening write
    /// gives the same answer.
    pub async fn is_locked(
        &self,
        identity: &str,
        origin: &str,
    ) -> Result<Option<LockoutInfo>, Error> {
        self.is_key_locked(&AttemptKey::new(identity, origin)).await
    }

    pub async fn is_key_locked(&self, key: &AttemptKey) -> Result<Option<LockoutInfo>, Error> {
        let policy = self.policy();
        if !policy.enabled {
            return Ok(None);
        }
        self.active_lockout(key, &policy, self.clock.now()).await
    }

    /// Record a failed credential check.
    ///
    /// Appends a `failed` record and, when the pair reaches the failure
    /// threshold, appends a `locked` record whose expiry comes from the
    /// policy schedule for the next occurrence. The new expiry never falls
    /// before the previous lockout's.
    ///
    /// If the policy is disabled nothing is recorded.
    pub async fn record_failure(
        &self,
        identity: &str,
        origin: &str,
    ) -> Result<FailureOutcome, Error> {
        self.record_key_failure(&AttemptKey::new(identity, origin))
            .await
    }

    pub async fn record_key_failure(&self, key: &AttemptKey) -> Result<FailureOutcome, Error> {
        let policy = self.policy();
        if !policy.enabled {
            return Ok(FailureOutcome::not_locked(0));
        }

        let lock = self.key_lock(key);
        let result = {
            let _guard = lock.lock().await;
            self.append_failure(key, &policy).await
        };
        drop(lock);
        self.release_key_lock(key);

        result
    }

    /// Record a successful login, resetting the failure count and escalation
    /// for the pair.
    pub async fn record_success(&self, identity: &str, origin: &str) -> Result<(), Error> {
        self.record_key_success(&AttemptKey::new(identity, origin))
            .await
    }

    pub async fn record_key_success(&self, key: &AttemptKey) -> Result<(), Error> {
        if !self.policy().enabled {
            return Ok(());
        }

        let lock = self.key_lock(key);
        let result = {
            let _guard = lock.lock().await;
            self.repository
                .append_record(NewAttemptRecord::success(key.clone(), self.clock.now()))
                .await
        };
        drop(lock);
        self.release_key_lock(key);

        result.map(|_| ())
    }

    /// Lift any lockout on the pair and reset its history.
    ///
    /// The reset is recorded the same way as a successful login.
    ///
    /// # Returns
    ///
    /// `true` if the pair was locked.
    pub async fn unlock(&self, identity: &str, origin: &str) -> Result<bool, Error> {
        let key = AttemptKey::new(identity, origin);
        let policy = self.policy();
        if !policy.enabled {
            return Ok(false);
        }

        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.unlock_locked(&key, &policy).await
        };
        drop(lock);
        self.release_key_lock(&key);

        result
    }

    /// Failure count, occurrence count and active lockout for the pair.
    pub async fn lockout_status(&self, identity: &str, origin: &str) -> Result<LockoutStatus, Error> {
        let key = AttemptKey::new(identity, origin);
        let policy = self.policy();
        if !policy.enabled {
            return Ok(LockoutStatus::unlocked(key));
        }

        let now = self.clock.now();
        let history = self.history(&key, &policy, now).await?;
        let lockout = self.active_lockout(&key, &policy, now).await?;

        Ok(LockoutStatus {
            key,
            failed_attempts: history.failed_attempts,
            occurrence: history.occurrence,
            lockout,
        })
    }

    /// Start the background cleanup task.
    ///
    /// Deletes attempt records older than the retention period of the policy
    /// in force when the task starts. Lockouts still in force are kept.
    pub fn start_cleanup_task(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let repository = Arc::clone(&self.repository);
        let clock = Arc::clone(&self.clock);
        let retention = self.policy().retention_period;

        const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(CLEANUP_INTERVAL);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let Some(before) = clock.now().checked_sub_signed(retention) else {
                            continue;
                        };
                        match repository.cleanup_before(before).await {
                            Ok(count) if count > 0 => {
                                tracing::info!(count = count, "Cleaned up old login attempt records");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to cleanup login attempt records");
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down lockout cleanup task");
                        break;
                    }
                }
            }
        })
    }

    async fn append_failure(
        &self,
        key: &AttemptKey,
        policy: &LockoutPolicy,
    ) -> Result<FailureOutcome, Error> {
        let now = self.clock.now();
        self.repository
            .append_record(NewAttemptRecord::failed(key.clone(), now))
            .await?;

        let history = self.history(key, policy, now).await?;
        if history.failed_attempts < policy.max_failures {
            tracing::debug!(
                identity = %key.identity,
                origin = %key.origin,
                failed_attempts = history.failed_attempts,
                "Recorded failed login attempt"
            );
            return Ok(FailureOutcome::not_locked(history.failed_attempts));
        }

        let occurrence = history.occurrence + 1;
        let mut until = policy.lockout_until(now, occurrence).map_err(|e| {
            tracing::error!(
                identity = %key.identity,
                origin = %key.origin,
                occurrence = occurrence,
                error = %e,
                "Lockout end is out of range"
            );
            e
        })?;
        if let Some(previous) = history.latest_lockout.and_then(|r| r.lockout_until) {
            until = until.max(previous);
        }

        self.repository
            .append_record(NewAttemptRecord::locked(
                key.clone(),
                now,
                until,
                occurrence,
            ))
            .await?;

        tracing::info!(
            identity = %key.identity,
            origin = %key.origin,
            occurrence = occurrence,
            locked_until = %until,
            "Login locked out after repeated failures"
        );

        Ok(FailureOutcome {
            failed_attempts: history.failed_attempts,
            lockout: Some(LockoutInfo {
                until,
                occurrence,
                message: policy.render_message(until),
            }),
        })
    }

    async fn unlock_locked(&self, key: &AttemptKey, policy: &LockoutPolicy) -> Result<bool, Error> {
        let now = self.clock.now();
        let was_locked = self.active_lockout(key, policy, now).await?.is_some();

        self.repository
            .append_record(NewAttemptRecord::success(key.clone(), now))
            .await?;

        if was_locked {
            tracing::info!(
                identity = %key.identity,
                origin = %key.origin,
                "Lockout lifted manually"
            );
        }
        Ok(was_locked)
    }

    async fn active_lockout(
        &self,
        key: &AttemptKey,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<LockoutInfo>, Error> {
        let latest = self
            .repository
            .query_recent(
                key,
                &RecordFilter::statuses(&[AttemptStatus::Locked, AttemptStatus::Success]).limit(1),
            )
            .await?;

        Ok(latest
            .into_iter()
            .next()
            .filter(|r| r.is_active_lockout(now))
            .and_then(|r| {
                let until = r.lockout_until?;
                Some(LockoutInfo {
                    until,
                    occurrence: r.occurrence.unwrap_or(1),
                    message: policy.render_message(until),
                })
            }))
    }

    async fn history(
        &self,
        key: &AttemptKey,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<PairHistory, Error> {
        let last_success = self
            .latest(key, RecordFilter::status(AttemptStatus::Success))
            .await?
            .map(|r| r.id);

        let lockouts_since_success = RecordFilter::status(AttemptStatus::Locked).after(last_success);
        let occurrence = self
            .repository
            .count_records(key, &lockouts_since_success)
            .await?;
        let latest_lockout = self.latest(key, lockouts_since_success).await?;

        let anchor = latest_lockout.as_ref().map(|r| r.id).max(last_success);
        let failed_attempts = self
            .repository
            .count_records(
                key,
                &RecordFilter::status(AttemptStatus::Failed)
                    .after(anchor)
                    .since(policy.window.start(now)),
            )
            .await?;

        Ok(PairHistory {
            failed_attempts: u32::try_from(failed_attempts).unwrap_or(u32::MAX),
            occurrence: u32::try_from(occurrence).unwrap_or(u32::MAX),
            latest_lockout,
        })
    }

    async fn latest(
        &self,
        key: &AttemptKey,
        filter: RecordFilter,
    ) -> Result<Option<AttemptRecord>, Error> {
        Ok(self
            .repository
            .query_recent(key, &filter.limit(1))
            .await?
            .into_iter()
            .next())
    }

    fn key_lock(&self, key: &AttemptKey) -> Arc<Mutex<()>> {
        Arc::clone(self.key_locks.entry(key.clone()).or_default().value())
    }

    /// Drop the pair's mutex once nobody else holds or waits on it.
    fn release_key_lock(&self, key: &AttemptKey) {
        self.key_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
