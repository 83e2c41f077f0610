//! Math challenge issuance.
//!
//! When the login form is rendered the host calls [`ChallengeIssuer::issue`]
//! and shows the two operands; the expected sum stays in the session store
//! until the attempt is evaluated.

use std::sync::Arc;

use chrono::Duration;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    Error, clock::Clock, error::ChallengeError, repositories::ChallengeStore,
};

/// How long an issued challenge stays answerable.
pub const DEFAULT_CHALLENGE_TTL_MINUTES: i64 = 15;

/// An addition puzzle with single-digit operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MathChallenge {
    pub left: u8,
    pub right: u8,
}

impl MathChallenge {
    pub fn answer(&self) -> u32 {
        u32::from(self.left) + u32::from(self.right)
    }

    pub fn prompt(&self) -> String {
        format!("{} + {} = ?", self.left, self.right)
    }
}

pub struct ChallengeIssuer<S: ChallengeStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl<S: ChallengeStore> ChallengeIssuer<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::minutes(DEFAULT_CHALLENGE_TTL_MINUTES),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a fresh challenge for the session, replacing any earlier one.
    pub async fn issue(&self, session_id: &str) -> Result<MathChallenge, Error> {
        if session_id.trim().is_empty() {
            return Err(ChallengeError::InvalidSession.into());
        }

        let challenge = {
            let mut rng = rand::rng();
            MathChallenge {
                left: rng.random_range(1..=9),
                right: rng.random_range(1..=9),
            }
        };

        let expires_at = self.clock.now() + self.ttl;
        self.store
            .put(session_id, challenge.answer(), expires_at)
            .await?;

        tracing::debug!(session_id = %session_id, "Issued login challenge");
        Ok(challenge)
    }

    /// The expected answer for the session's current challenge.
    pub async fn current(&self, session_id: &str) -> Result<Option<u32>, Error> {
        if session_id.trim().is_empty() {
            return Ok(None);
        }
        self.store.get(session_id, self.clock.now()).await
    }

    /// Consume the session's challenge, returning its answer if it was still
    /// live. A second call for the same challenge always gets `None`.
    pub async fn take(&self, session_id: &str) -> Result<Option<u32>, Error> {
        if session_id.trim().is_empty() {
            return Ok(None);
        }
        self.store.take(session_id, self.clock.now()).await
    }

    pub async fn clear(&self, session_id: &str) -> Result<(), Error> {
        self.store.remove(session_id).await
    }

    pub async fn cleanup_expired(&self) -> Result<u64, Error> {
        self.store.cleanup_expired(self.clock.now()).await
    }
}
