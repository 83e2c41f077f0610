//! # loginward
//!
//! loginward guards a login form against brute force and automated
//! submissions. Every attempt passes three checks before the host verifies
//! credentials:
//!
//! - a honeypot field that only bots fill in
//! - a lockout on the `(identity, origin)` pair after repeated failures, with
//!   durations that escalate on each repeat
//! - a small math challenge whose answer is kept per session
//!
//! The host reports the outcome of its credential check back with
//! [`LoginWard::record_failure`] or [`LoginWard::record_success`]. loginward
//! never sees passwords.
//!
//! ## Storage Support
//!
//! - SQLite (feature `sqlite`, on by default)
//! - in-memory, for tests and single-process deployments
//! - any custom [`AttemptRepository`]
//!
//! Issued challenges live in process memory unless a shared
//! [`ChallengeStore`] is passed to
//! [`LoginWardBuilder::with_challenge_store`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use loginward::{LoginAttempt, LoginWardBuilder, Verdict};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ward = LoginWardBuilder::new()
//!         .with_sqlite("sqlite://loginward.db")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     // Rendering the form
//!     let challenge = ward.issue_challenge("session-1").await?;
//!     println!("{}", challenge.prompt());
//!
//!     // Handling the submission
//!     let attempt = LoginAttempt::new("alice", "203.0.113.7")
//!         .with_session("session-1")
//!         .with_challenge_answer("7");
//!
//!     match ward.check_attempt(&attempt).await?.into_verdict() {
//!         Verdict::Allow => {
//!             // verify the password, then record_success or record_failure
//!         }
//!         Verdict::RejectLocked { message, .. } => println!("{message}"),
//!         other => println!("rejected: {}", other.code()),
//!     }
//!
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

use loginward_core::services::{AttemptContext, AttemptGate, ChallengeIssuer, LockoutTracker};
use serde::{Deserialize, Serialize};

pub mod builder;

pub use builder::{LoginWardBuilder, LoginWardBuilderError, NoStorage, WithStorage};

/// Re-export core types from loginward_core
pub use loginward_core::{
    AttemptKey, AttemptRecord, AttemptRepository, AttemptStatus, ChallengeStore, Clock, Evaluation,
    FailureOutcome, FailureWindow, InMemoryAttemptRepository, InMemoryChallengeStore,
    LockoutInfo, LockoutPolicy, LockoutSchedule, LockoutStatus, LookupFailureMode, ManualClock,
    MathChallenge, PolicySettings, SystemClock, Verdict,
};

/// Re-export storage backends
#[cfg(feature = "sqlite")]
pub use loginward_storage_sqlite::{SqliteAttemptRepository, SqliteStorage};

/// Errors that can occur when using loginward.
#[derive(Debug, thiserror::Error)]
pub enum LoginWardError {
    /// Error when interacting with storage
    #[error("Storage error: {0}")]
    StorageError(String),
    /// The lockout policy was rejected
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// Error issuing or reading a math challenge
    #[error("Challenge error: {0}")]
    ChallengeError(String),
}

impl From<loginward_core::Error> for LoginWardError {
    fn from(e: loginward_core::Error) -> Self {
        match e {
            loginward_core::Error::Storage(e) => LoginWardError::StorageError(e.to_string()),
            loginward_core::Error::Config(e) => LoginWardError::ConfigError(e.to_string()),
            loginward_core::Error::Challenge(e) => LoginWardError::ChallengeError(e.to_string()),
        }
    }
}

/// A submitted login form, as seen before the credential check.
///
/// # Example
///
/// ```rust
/// use loginward::LoginAttempt;
///
/// let attempt = LoginAttempt::new("alice", "203.0.113.7")
///     .with_session("session-1")
///     .with_challenge_answer("12");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginAttempt {
    pub identity: String,
    /// Client address; blank becomes `"unknown"`.
    pub origin: String,
    pub honeypot: Option<String>,
    pub challenge_answer: Option<String>,
    /// Session the math challenge was issued to.
    pub session_id: Option<String>,
}

impl LoginAttempt {
    pub fn new(identity: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            origin: origin.into(),
            ..Default::default()
        }
    }

    pub fn with_honeypot(mut self, value: impl Into<String>) -> Self {
        self.honeypot = Some(value.into());
        self
    }

    pub fn with_challenge_answer(mut self, answer: impl Into<String>) -> Self {
        self.challenge_answer = Some(answer.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// The main loginward instance.
///
/// Holds the lockout tracker, the gate that reads it, and the issuer of math
/// challenges. Cheap to share behind an `Arc`; all methods take `&self`.
pub struct LoginWard<R: AttemptRepository, S: ChallengeStore = InMemoryChallengeStore> {
    tracker: Arc<LockoutTracker<R>>,
    gate: AttemptGate<R>,
    challenges: ChallengeIssuer<S>,
}

impl<R: AttemptRepository> LoginWard<R> {
    /// Create an instance with the default policy, the system clock and an
    /// in-memory challenge store.
    pub fn new(repository: Arc<R>) -> Result<Self, LoginWardError> {
        Self::from_parts(
            repository,
            Arc::new(InMemoryChallengeStore::new()),
            LockoutPolicy::default(),
            Arc::new(SystemClock),
            None,
        )
    }
}

impl<R: AttemptRepository, S: ChallengeStore> LoginWard<R, S> {
    pub(crate) fn from_parts(
        repository: Arc<R>,
        challenge_store: Arc<S>,
        policy: LockoutPolicy,
        clock: Arc<dyn Clock>,
        challenge_ttl: Option<chrono::Duration>,
    ) -> Result<Self, LoginWardError> {
        let tracker = Arc::new(LockoutTracker::new(repository, policy, Arc::clone(&clock))?);
        let gate = AttemptGate::new(Arc::clone(&tracker));

        let mut challenges = ChallengeIssuer::new(challenge_store, clock);
        if let Some(ttl) = challenge_ttl {
            challenges = challenges.with_ttl(ttl);
        }

        Ok(Self {
            tracker,
            gate,
            challenges,
        })
    }

    pub fn tracker(&self) -> &Arc<LockoutTracker<R>> {
        &self.tracker
    }

    pub fn gate(&self) -> &AttemptGate<R> {
        &self.gate
    }

    pub fn policy(&self) -> Arc<LockoutPolicy> {
        self.tracker.policy()
    }

    /// Replace the lockout policy. The current policy stays in force if the
    /// new one is invalid.
    pub fn reload_policy(&self, policy: LockoutPolicy) -> Result<(), LoginWardError> {
        Ok(self.tracker.reload_policy(policy)?)
    }

    /// Run migrations for the attempt repository
    pub async fn migrate(&self) -> Result<(), LoginWardError> {
        Ok(self.tracker.repository().migrate().await?)
    }

    pub async fn health_check(&self) -> Result<(), LoginWardError> {
        Ok(self.tracker.repository().health_check().await?)
    }

    /// Issue a math challenge for the session, replacing any earlier one.
    pub async fn issue_challenge(&self, session_id: &str) -> Result<MathChallenge, LoginWardError> {
        Ok(self.challenges.issue(session_id).await?)
    }

    /// Decide whether the attempt may proceed to the credential check.
    ///
    /// Any submission that names a session consumes that session's challenge,
    /// whatever the verdict, so each issued challenge admits at most one
    /// attempt even under concurrent submissions. With `count_rejections_as_failures` set, bot and
    /// challenge rejections are also recorded as failures for the pair;
    /// lockout rejections never are.
    ///
    /// # Errors
    ///
    /// Storage failures during the lockout lookup are only returned under
    /// [`LookupFailureMode::FailClosed`]; otherwise they are reported through
    /// [`Evaluation::lookup_error`].
    pub async fn check_attempt(&self, attempt: &LoginAttempt) -> Result<Evaluation, LoginWardError> {
        let session_id = attempt
            .session_id
            .as_deref()
            .filter(|s| !s.trim().is_empty());

        let issued = match session_id {
            Some(session_id) => self.challenges.take(session_id).await?,
            None => None,
        };

        let ctx = AttemptContext::new(attempt.identity.clone(), attempt.origin.clone())
            .with_honeypot(attempt.honeypot.clone())
            .with_challenge_answer(attempt.challenge_answer.clone())
            .with_issued_challenge(issued);
        let key = ctx.key();

        let evaluation = self.gate.evaluate(ctx).await?;

        tracing::debug!(
            identity = %key.identity,
            origin = %key.origin,
            verdict = evaluation.verdict.code(),
            degraded = evaluation.is_degraded(),
            "Evaluated login attempt"
        );

        if self.policy().count_rejections_as_failures
            && matches!(
                evaluation.verdict,
                Verdict::RejectBot | Verdict::RejectChallenge
            )
        {
            self.tracker.record_key_failure(&key).await?;
        }

        Ok(evaluation)
    }

    /// Report a failed credential check.
    pub async fn record_failure(
        &self,
        identity: &str,
        origin: &str,
    ) -> Result<FailureOutcome, LoginWardError> {
        Ok(self.tracker.record_failure(identity, origin).await?)
    }

    /// Report a successful credential check.
    pub async fn record_success(&self, identity: &str, origin: &str) -> Result<(), LoginWardError> {
        Ok(self.tracker.record_success(identity, origin).await?)
    }

    pub async fn is_locked(
        &self,
        identity: &str,
        origin: &str,
    ) -> Result<Option<LockoutInfo>, LoginWardError> {
        Ok(self.tracker.is_locked(identity, origin).await?)
    }

    /// Lift the lockout on a pair. Returns `true` if it was locked.
    pub async fn unlock(&self, identity: &str, origin: &str) -> Result<bool, LoginWardError> {
        Ok(self.tracker.unlock(identity, origin).await?)
    }

    pub async fn lockout_status(
        &self,
        identity: &str,
        origin: &str,
    ) -> Result<LockoutStatus, LoginWardError> {
        Ok(self.tracker.lockout_status(identity, origin).await?)
    }

    /// Drop challenges whose time to live has passed.
    pub async fn cleanup_expired_challenges(&self) -> Result<u64, LoginWardError> {
        Ok(self.challenges.cleanup_expired().await?)
    }

    /// Start the background task that prunes old attempt records.
    ///
    /// Send `true` on the paired `watch::Sender` to stop it.
    pub fn start_cleanup_task(
        &self,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        self.tracker.start_cleanup_task(shutdown)
    }
}
