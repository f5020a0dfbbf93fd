use super::{SessionStore, SessionToken, VoterSession};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory session store
///
/// Sessions are lost on restart and not shared across instances.
#[derive(Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionToken, VoterSession>>>,
    ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(36_500)),
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn issue(&self) -> Result<SessionToken> {
        let now = Utc::now();
        let token = SessionToken::generate();
        let session = VoterSession {
            token: token.clone(),
            created_at: now,
            expires_at: now.checked_add_signed(self.ttl).unwrap_or(chrono::DateTime::<Utc>::MAX_UTC),
        };
        self.sessions.write().await.insert(token.clone(), session);
        tracing::debug!(target: "farmgate::session", "Issued anonymous voter session");
        Ok(token)
    }

    async fn validate(&self, token: &SessionToken) -> Result<bool> {
        let now = Utc::now();
        let sessions = self.sessions.read().await;

        match sessions.get(token) {
            Some(session) if session.is_expired_at(now) => {
                drop(sessions);
                self.sessions.write().await.remove(token);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn revoke(&self, token: &SessionToken) -> Result<()> {
        self.sessions.write().await.remove(token);
        Ok(())
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let initial_len = sessions.len();
        sessions.retain(|_, session| !session.is_expired_at(now));
        Ok(initial_len - sessions.len())
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(30 * 24 * 3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_issue_and_validate() {
        let store = InMemorySessionStore::new(Duration::from_secs(3600));
        let token = store.issue().await.unwrap();

        assert!(store.validate(&token).await.unwrap());
        assert!(!store.validate(&SessionToken::generate()).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke() {
        let store = InMemorySessionStore::new(Duration::from_secs(3600));
        let token = store.issue().await.unwrap();

        store.revoke(&token).await.unwrap();
        assert!(!store.validate(&token).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_expiration() {
        let store = InMemorySessionStore::new(Duration::from_millis(10));
        let token = store.issue().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!store.validate(&token).await.unwrap());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let short = InMemorySessionStore::new(Duration::from_millis(10));
        short.issue().await.unwrap();
        short.issue().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(short.cleanup_expired().await.unwrap(), 2);
        assert!(short.is_empty().await);
    }
}
