//! Attempt gating.
//!
//! [`AttemptGate::evaluate`] runs a fixed sequence of checks before the host
//! verifies credentials:
//!
//! 1. honeypot: any non-empty value means an automated submission;
//! 2. lockout: an active lockout rejects immediately and records nothing;
//! 3. challenge: the submitted answer must exactly match the issued sum.
//!
//! Each check only runs if the previous one passed. The gate never looks at
//! credentials and never writes to storage.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    policy::LookupFailureMode,
    repositories::AttemptRepository,
    services::LockoutTracker,
    storage::AttemptKey,
};

/// Everything the gate needs to know about one authentication attempt.
///
/// Taken by value by [`AttemptGate::evaluate`] and dropped once the verdict is
/// produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptContext {
    pub identity: String,
    pub origin: String,
    pub honeypot_value: Option<String>,
    pub challenge_answer: Option<String>,
    /// Expected answer held in the session, if a challenge was rendered.
    pub issued_challenge: Option<u32>,
}

impl AttemptContext {
    pub fn new(identity: impl Into<String>, origin: impl Into<String>) -> Self {
        let key = AttemptKey::new(identity, origin);
        Self {
            identity: key.identity,
            origin: key.origin,
            honeypot_value: None,
            challenge_answer: None,
            issued_challenge: None,
        }
    }

    pub fn with_honeypot(mut self, value: Option<String>) -> Self {
        self.honeypot_value = value;
        self
    }

    pub fn with_challenge_answer(mut self, answer: Option<String>) -> Self {
        self.challenge_answer = answer;
        self
    }

    pub fn with_issued_challenge(mut self, issued: Option<u32>) -> Self {
        self.issued_challenge = issued;
        self
    }

    pub fn key(&self) -> AttemptKey {
        AttemptKey::new(self.identity.clone(), self.origin.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Proceed to the credential check.
    Allow,
    RejectBot,
    RejectChallenge,
    RejectLocked {
        until: DateTime<Utc>,
        occurrence: u32,
        message: String,
    },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    /// Short machine-readable name, used in logs.
    pub fn code(&self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::RejectBot => "reject_bot",
            Verdict::RejectChallenge => "reject_challenge",
            Verdict::RejectLocked { .. } => "reject_locked",
        }
    }
}

/// A verdict plus the lockout lookup error tolerated under
/// [`LookupFailureMode::FailOpen`].
#[derive(Debug)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub lookup_error: Option<Error>,
}

impl Evaluation {
    fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            lookup_error: None,
        }
    }

    pub fn verdict(&self) -> &Verdict {
        &self.verdict
    }

    pub fn into_verdict(self) -> Verdict {
        self.verdict
    }

    /// Whether the lockout check was skipped because storage failed.
    pub fn is_degraded(&self) -> bool {
        self.lookup_error.is_some()
    }
}

pub struct AttemptGate<R: AttemptRepository> {
    tracker: Arc<LockoutTracker<R>>,
}

impl<R: AttemptRepository> AttemptGate<R> {
    pub fn new(tracker: Arc<LockoutTracker<R>>) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &Arc<LockoutTracker<R>> {
        &self.tracker
    }

    /// Decide whether the attempt may proceed to the credential check.
    ///
    /// # Errors
    ///
    /// Only when the lockout lookup fails and the policy is
    /// [`LookupFailureMode::FailClosed`]. Rejections are verdicts, not errors.
    pub async fn evaluate(&self, ctx: AttemptContext) -> Result<Evaluation, Error> {
        let key = ctx.key();

        if ctx.honeypot_value.as_deref().is_some_and(|v| !v.is_empty()) {
            tracing::debug!(
                identity = %key.identity,
                origin = %key.origin,
                "Honeypot field filled, rejecting attempt"
            );
            return Ok(Evaluation::new(Verdict::RejectBot));
        }

        let mut lookup_error = None;
        match self.tracker.is_key_locked(&key).await {
            Ok(Some(lockout)) => {
                tracing::debug!(
                    identity = %key.identity,
                    origin = %key.origin,
                    locked_until = %lockout.until,
                    "Rejecting attempt during lockout"
                );
                return Ok(Evaluation::new(Verdict::RejectLocked {
                    until: lockout.until,
                    occurrence: lockout.occurrence,
                    message: lockout.message,
                }));
            }
            Ok(None) => {}
            Err(e) => match self.tracker.policy().lookup_failure {
                LookupFailureMode::FailClosed => {
                    tracing::error!(
                        error = %e,
                        identity = %key.identity,
                        origin = %key.origin,
                        "Lockout lookup failed, refusing attempt"
                    );
                    return Err(e);
                }
                LookupFailureMode::FailOpen => {
                    tracing::warn!(
                        error = %e,
                        identity = %key.identity,
                        origin = %key.origin,
                        "Lockout lookup failed, treating pair as not locked"
                    );
                    lookup_error = Some(e);
                }
            },
        }

        let verdict = if challenge_passes(ctx.issued_challenge, ctx.challenge_answer.as_deref()) {
            Verdict::Allow
        } else {
            Verdict::RejectChallenge
        };

        tracing::debug!(
            identity = %key.identity,
            origin = %key.origin,
            verdict = verdict.code(),
            "Evaluated login attempt"
        );

        Ok(Evaluation {
            verdict,
            lookup_error,
        })
    }
}

/// An answer passes only if a challenge was issued and the answer is exactly
/// its decimal form. Missing state on either side is a failure.
fn challenge_passes(issued: Option<u32>, answer: Option<&str>) -> bool {
    match (issued, answer) {
        (Some(expected), Some(answer)) => answer == expected.to_string(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::error::StorageError;
    use crate::policy::LockoutPolicy;
    use crate::repositories::InMemoryAttemptRepository;
    use crate::storage::{AttemptRecord, NewAttemptRecord, RecordFilter};
    use chrono::Duration;

    fn gate(policy: LockoutPolicy) -> (AttemptGate<InMemoryAttemptRepository>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let tracker = LockoutTracker::new(
            Arc::new(InMemoryAttemptRepository::new()),
            policy,
            clock.clone(),
        )
        .unwrap();
        (AttemptGate::new(Arc::new(tracker)), clock)
    }

    fn attempt(answer: &str, issued: u32) -> AttemptContext {
        AttemptContext::new("alice", "10.0.0.1")
            .with_challenge_answer(Some(answer.to_string()))
            .with_issued_challenge(Some(issued))
    }

    async fn lock_alice(gate: &AttemptGate<InMemoryAttemptRepository>) {
        for _ in 0..3 {
            gate.tracker()
                .record_failure("alice", "10.0.0.1")
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_challenge_passes() {
        assert!(challenge_passes(Some(7), Some("7")));
        assert!(!challenge_passes(Some(7), Some("8")));
        assert!(!challenge_passes(Some(7), Some("")));
        assert!(!challenge_passes(Some(7), Some("07")));
        assert!(!challenge_passes(Some(7), None));
        assert!(!challenge_passes(None, Some("7")));
        assert!(!challenge_passes(None, None));
    }

    #[test]
    fn test_context_defaults_origin() {
        let ctx = AttemptContext::new("alice", "");
        assert_eq!(ctx.origin, "unknown");
    }

    #[tokio::test]
    async fn test_correct_answer_is_allowed() {
        let (gate, _) = gate(LockoutPolicy::default());
        let evaluation = gate.evaluate(attempt("7", 7)).await.unwrap();
        assert_eq!(evaluation.verdict, Verdict::Allow);
        assert!(!evaluation.is_degraded());
    }

    #[tokio::test]
    async fn test_wrong_answer_is_rejected() {
        let (gate, _) = gate(LockoutPolicy::default());
        let evaluation = gate.evaluate(attempt("8", 7)).await.unwrap();
        assert_eq!(evaluation.verdict, Verdict::RejectChallenge);
    }

    #[tokio::test]
    async fn test_missing_challenge_state_is_rejected() {
        let (gate, _) = gate(LockoutPolicy::default());

        let no_issue = AttemptContext::new("alice", "10.0.0.1")
            .with_challenge_answer(Some("7".to_string()));
        assert_eq!(
            gate.evaluate(no_issue).await.unwrap().verdict,
            Verdict::RejectChallenge
        );

        let no_answer = AttemptContext::new("alice", "10.0.0.1").with_issued_challenge(Some(7));
        assert_eq!(
            gate.evaluate(no_answer).await.unwrap().verdict,
            Verdict::RejectChallenge
        );
    }

    #[tokio::test]
    async fn test_honeypot_wins_over_everything() {
        let (gate, _) = gate(LockoutPolicy::default());
        lock_alice(&gate).await;

        let ctx = attempt("7", 7).with_honeypot(Some("spam".to_string()));
        assert_eq!(gate.evaluate(ctx).await.unwrap().verdict, Verdict::RejectBot);

        let ctx = AttemptContext::new("bob", "10.0.0.9").with_honeypot(Some(" ".to_string()));
        assert_eq!(gate.evaluate(ctx).await.unwrap().verdict, Verdict::RejectBot);
    }

    #[tokio::test]
    async fn test_empty_honeypot_is_ignored() {
        let (gate, _) = gate(LockoutPolicy::default());
        let ctx = attempt("7", 7).with_honeypot(Some(String::new()));
        assert_eq!(gate.evaluate(ctx).await.unwrap().verdict, Verdict::Allow);
    }

    #[tokio::test]
    async fn test_lockout_short_circuits_challenge() {
        let (gate, clock) = gate(LockoutPolicy::default());
        lock_alice(&gate).await;
        let records_before = gate.tracker().repository().len();

        // A correct answer does not help while locked
        let verdict = gate.evaluate(attempt("7", 7)).await.unwrap().into_verdict();
        match verdict {
            Verdict::RejectLocked {
                until, occurrence, ..
            } => {
                assert_eq!(until, clock.now() + Duration::minutes(15));
                assert_eq!(occurrence, 1);
            }
            other => panic!("expected lockout, got {other:?}"),
        }

        // Neither does a missing one, and nothing is recorded either way
        let verdict = gate
            .evaluate(AttemptContext::new("alice", "10.0.0.1"))
            .await
            .unwrap()
            .into_verdict();
        assert_eq!(verdict.code(), "reject_locked");
        assert_eq!(gate.tracker().repository().len(), records_before);
    }

    #[tokio::test]
    async fn test_lockout_expiry_reopens_gate() {
        let (gate, clock) = gate(LockoutPolicy::default());
        lock_alice(&gate).await;
        clock.advance(Duration::minutes(15));

        assert_eq!(
            gate.evaluate(attempt("7", 7)).await.unwrap().verdict,
            Verdict::Allow
        );
    }

    #[tokio::test]
    async fn test_verdict_serializes_with_tag() {
        let json = serde_json::to_value(Verdict::RejectChallenge).unwrap();
        assert_eq!(json["verdict"], "reject_challenge");
    }

    struct FlakyRepository;

    #[async_trait::async_trait]
    impl AttemptRepository for FlakyRepository {
        async fn append_record(&self, _record: NewAttemptRecord) -> Result<AttemptRecord, Error> {
            Err(StorageError::Unavailable("down".to_string()).into())
        }

        async fn query_recent(
            &self,
            _key: &AttemptKey,
            _filter: &RecordFilter,
        ) -> Result<Vec<AttemptRecord>, Error> {
            Err(StorageError::Unavailable("down".to_string()).into())
        }

        async fn count_records(
            &self,
            _key: &AttemptKey,
            _filter: &RecordFilter,
        ) -> Result<u64, Error> {
            Err(StorageError::Unavailable("down".to_string()).into())
        }

        async fn cleanup_before(&self, _before: DateTime<Utc>) -> Result<u64, Error> {
            Ok(0)
        }

        async fn health_check(&self) -> Result<(), Error> {
            Err(StorageError::Unavailable("down".to_string()).into())
        }
    }

    fn flaky_gate(policy: LockoutPolicy) -> AttemptGate<FlakyRepository> {
        let tracker = LockoutTracker::new(
            Arc::new(FlakyRepository),
            policy,
            Arc::new(ManualClock::default()),
        )
        .unwrap();
        AttemptGate::new(Arc::new(tracker))
    }

    #[tokio::test]
    async fn test_fail_open_continues_and_reports_error() {
        let gate = flaky_gate(LockoutPolicy::default());

        let evaluation = gate.evaluate(attempt("7", 7)).await.unwrap();
        assert_eq!(evaluation.verdict, Verdict::Allow);
        assert!(evaluation.is_degraded());
        assert!(evaluation.lookup_error.unwrap().is_unavailable());

        // Later checks still apply
        let evaluation = gate.evaluate(attempt("8", 7)).await.unwrap();
        assert_eq!(evaluation.verdict, Verdict::RejectChallenge);
    }

    #[tokio::test]
    async fn test_fail_closed_returns_error() {
        let gate = flaky_gate(
            LockoutPolicy::default().with_lookup_failure(LookupFailureMode::FailClosed),
        );

        let result = gate.evaluate(attempt("7", 7)).await;
        assert!(result.unwrap_err().is_storage_error());

        // The honeypot check needs no storage
        let ctx = attempt("7", 7).with_honeypot(Some("x".to_string()));
        assert_eq!(gate.evaluate(ctx).await.unwrap().verdict, Verdict::RejectBot);
    }
}
