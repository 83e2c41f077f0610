//! Session-scoped storage for issued challenges.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::Error;

/// Holds the expected answer of the challenge last shown to each session.
///
/// Issuing a new challenge for a session replaces the previous one.
#[async_trait]
pub trait ChallengeStore: Send + Sync + 'static {
    async fn put(
        &self,
        session_id: &str,
        answer: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<(), Error>;

    /// The stored answer, if one exists and has not expired at `now`.
    async fn get(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<u32>, Error>;

    /// Remove the session's answer and return it if it had not expired at
    /// `now`. Reading and removing happen as one step, so concurrent callers
    /// never both receive the same answer.
    async fn take(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<u32>, Error>;

    async fn remove(&self, session_id: &str) -> Result<(), Error>;

    /// Drop expired entries, returning how many were removed.
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, Error>;
}

#[derive(Debug, Clone, Copy)]
struct StoredChallenge {
    answer: u32,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct InMemoryChallengeStore {
    challenges: DashMap<String, StoredChallenge>,
}

impl InMemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}

#[async_trait]
impl ChallengeStore for InMemoryChallengeStore {
    async fn put(
        &self,
        session_id: &str,
        answer: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.challenges
            .insert(session_id.to_string(), StoredChallenge { answer, expires_at });
        Ok(())
    }

    async fn get(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<u32>, Error> {
        Ok(self
            .challenges
            .get(session_id)
            .filter(|c| c.expires_at > now)
            .map(|c| c.answer))
    }

    async fn take(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<u32>, Error> {
        Ok(self
            .challenges
            .remove(session_id)
            .map(|(_, c)| c)
            .filter(|c| c.expires_at > now)
            .map(|c| c.answer))
    }

    async fn remove(&self, session_id: &str) -> Result<(), Error> {
        self.challenges.remove(session_id);
        Ok(())
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let before = self.challenges.len();
        self.challenges.retain(|_, c| c.expires_at > now);
        Ok(before.saturating_sub(self.challenges.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_put_get_and_expiry() {
        let store = InMemoryChallengeStore::new();
        let now = Utc::now();

        store
            .put("sess-1", 7, now + Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(store.get("sess-1", now).await.unwrap(), Some(7));
        assert_eq!(store.get("sess-2", now).await.unwrap(), None);
        assert_eq!(
            store
                .get("sess-1", now + Duration::minutes(5))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_put_replaces_previous_answer() {
        let store = InMemoryChallengeStore::new();
        let expires = Utc::now() + Duration::minutes(5);

        store.put("sess-1", 7, expires).await.unwrap();
        store.put("sess-1", 12, expires).await.unwrap();

        assert_eq!(store.get("sess-1", Utc::now()).await.unwrap(), Some(12));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_take_removes_the_answer() {
        let store = InMemoryChallengeStore::new();
        let now = Utc::now();

        store
            .put("sess-1", 7, now + Duration::minutes(5))
            .await
            .unwrap();
        store.put("stale", 9, now).await.unwrap();

        assert_eq!(store.take("sess-1", now).await.unwrap(), Some(7));
        assert_eq!(store.take("sess-1", now).await.unwrap(), None);
        // Expired answers are dropped without being returned
        assert_eq!(store.take("stale", now).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_take_hands_out_an_answer_once() {
        let store = std::sync::Arc::new(InMemoryChallengeStore::new());
        let now = Utc::now();
        store
            .put("sess-1", 7, now + Duration::minutes(5))
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.take("sess-1", now).await.unwrap() })
            })
            .collect();

        let mut taken = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                taken += 1;
            }
        }
        assert_eq!(taken, 1);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = InMemoryChallengeStore::new();
        let now = Utc::now();

        store.put("old", 3, now - Duration::seconds(1)).await.unwrap();
        store.put("fresh", 4, now + Duration::minutes(1)).await.unwrap();

        assert_eq!(store.cleanup_expired(now).await.unwrap(), 1);
        assert_eq!(store.len(), 1);

        store.remove("fresh").await.unwrap();
        assert!(store.is_empty());
    }
}
