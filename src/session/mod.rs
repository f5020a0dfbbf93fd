//! Anonymous voter sessions.
//!
//! Visitors who rate a farm without signing in are identified by an opaque
//! [`SessionToken`]. The token is issued the first time they vote and handed
//! back to the client, which presents it on later requests so the same
//! visitor keeps a single rating per farm.

mod in_memory;

pub use in_memory::InMemorySessionStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque identifier for an anonymous visitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wrap a token presented by a client.
    ///
    /// Returns `None` for empty or oversized values, or values containing
    /// characters outside `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw.len() <= 128
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored anonymous session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoterSession {
    pub token: SessionToken,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl VoterSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Storage for anonymous voter sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Issue a new session and return its token.
    async fn issue(&self) -> Result<SessionToken>;

    /// Check that a token refers to a live session.
    ///
    /// Expired sessions are treated as unknown.
    async fn validate(&self, token: &SessionToken) -> Result<bool>;

    /// Forget a session.
    async fn revoke(&self, token: &SessionToken) -> Result<()>;

    /// Drop expired sessions, returning how many were removed.
    async fn cleanup_expired(&self) -> Result<usize>;

    fn is_healthy(&self) -> bool {
        true
    }
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn issue(&self) -> Result<SessionToken> {
        (**self).issue().await
    }

    async fn validate(&self, token: &SessionToken) -> Result<bool> {
        (**self).validate(token).await
    }

    async fn revoke(&self, token: &SessionToken) -> Result<()> {
        (**self).revoke(token).await
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        (**self).cleanup_expired().await
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}
