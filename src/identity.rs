//! Caller identity as seen by the rating and subscription components.
//!
//! Authentication happens upstream. Whatever performs it inserts an
//! [`Identity`] into the request extensions; when none is present the caller
//! is anonymous, optionally carrying a voter session token in the
//! `x-voter-session` header.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;

use crate::error::Result;
use crate::ratings::VoterId;
use crate::session::{SessionStore, SessionToken};

/// Header carrying an anonymous voter's session token, in both directions.
pub const SESSION_HEADER: &str = "x-voter-session";

/// Account roles on the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Farmer,
    Consumer,
    Admin,
}

impl AccountRole {
    /// Whether requests from this role pass through the subscription gate.
    pub fn requires_subscription(self) -> bool {
        matches!(self, Self::Farmer)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Farmer => "farmer",
            Self::Consumer => "consumer",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Account { account_id: String, role: AccountRole },
    Anonymous { session: Option<SessionToken> },
}

impl Identity {
    pub fn account(account_id: impl Into<String>, role: AccountRole) -> Self {
        Self::Account {
            account_id: account_id.into(),
            role,
        }
    }

    pub fn anonymous() -> Self {
        Self::Anonymous { session: None }
    }

    pub fn anonymous_with(session: SessionToken) -> Self {
        Self::Anonymous {
            session: Some(session),
        }
    }

    pub fn account_id(&self) -> Option<&str> {
        match self {
            Self::Account { account_id, .. } => Some(account_id),
            Self::Anonymous { .. } => None,
        }
    }

    pub fn role(&self) -> Option<AccountRole> {
        match self {
            Self::Account { role, .. } => Some(*role),
            Self::Anonymous { .. } => None,
        }
    }

    /// Build the identity for a request that carries no `Identity` extension.
    fn from_headers(parts: &Parts) -> Self {
        let session = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(SessionToken::parse);
        Self::Anonymous { session }
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            return Ok(identity.clone());
        }
        Ok(Self::from_headers(parts))
    }
}

/// A voter id resolved for a write, plus any session issued along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVoter {
    pub voter_id: VoterId,
    /// Set when a new anonymous session was created; the caller must hand
    /// it back to the client.
    pub issued_session: Option<SessionToken>,
}

/// Resolve the voter for a rating submission.
///
/// Anonymous callers without a live session get a new one.
pub async fn resolve_voter<S>(identity: &Identity, sessions: &S) -> Result<ResolvedVoter>
where
    S: SessionStore + ?Sized,
{
    match identity {
        Identity::Account { account_id, .. } => Ok(ResolvedVoter {
            voter_id: VoterId::account(account_id),
            issued_session: None,
        }),
        Identity::Anonymous {
            session: Some(token),
        } if sessions.validate(token).await? => Ok(ResolvedVoter {
            voter_id: VoterId::anonymous(token),
            issued_session: None,
        }),
        Identity::Anonymous { .. } => {
            let token = sessions.issue().await?;
            Ok(ResolvedVoter {
                voter_id: VoterId::anonymous(&token),
                issued_session: Some(token),
            })
        }
    }
}

/// Look up the voter for a read. Never issues a session.
pub async fn lookup_voter<S>(identity: &Identity, sessions: &S) -> Result<Option<VoterId>>
where
    S: SessionStore + ?Sized,
{
    match identity {
        Identity::Account { account_id, .. } => Ok(Some(VoterId::account(account_id))),
        Identity::Anonymous {
            session: Some(token),
        } => {
            if sessions.validate(token).await? {
                Ok(Some(VoterId::anonymous(token)))
            } else {
                Ok(None)
            }
        }
        Identity::Anonymous { session: None } => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionStore;
    use axum::http::Request;

    #[test]
    fn test_role_gating() {
        assert!(AccountRole::Farmer.requires_subscription());
        assert!(!AccountRole::Consumer.requires_subscription());
        assert!(!AccountRole::Admin.requires_subscription());
    }

    #[tokio::test]
    async fn test_account_voter() {
        let sessions = InMemorySessionStore::default();
        let identity = Identity::account("42", AccountRole::Consumer);

        let resolved = resolve_voter(&identity, &sessions).await.unwrap();
        assert_eq!(resolved.voter_id.as_str(), "user_42");
        assert!(resolved.issued_session.is_none());
        assert!(sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_anonymous_voter_gets_session_lazily() {
        let sessions = InMemorySessionStore::default();

        assert_eq!(lookup_voter(&Identity::anonymous(), &sessions).await.unwrap(), None);
        assert!(sessions.is_empty().await);

        let resolved = resolve_voter(&Identity::anonymous(), &sessions).await.unwrap();
        let token = resolved.issued_session.expect("session issued");
        assert_eq!(resolved.voter_id.as_str(), format!("anon_{}", token));

        let again = resolve_voter(&Identity::anonymous_with(token.clone()), &sessions)
            .await
            .unwrap();
        assert_eq!(again.voter_id, resolved.voter_id);
        assert!(again.issued_session.is_none());
    }

    #[tokio::test]
    async fn test_unknown_session_is_replaced() {
        let sessions = InMemorySessionStore::default();
        let stale = SessionToken::generate();

        let resolved = resolve_voter(&Identity::anonymous_with(stale.clone()), &sessions)
            .await
            .unwrap();
        assert_ne!(resolved.issued_session, Some(stale.clone()));
        assert!(resolved.issued_session.is_some());

        let looked_up = lookup_voter(&Identity::anonymous_with(stale), &sessions).await.unwrap();
        assert_eq!(looked_up, None);
    }

    #[tokio::test]
    async fn test_extractor_prefers_extension() {
        let mut request = Request::builder()
            .header(SESSION_HEADER, "abc123")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(Identity::account("7", AccountRole::Farmer));
        let (mut parts, _) = request.into_parts();

        let identity = Identity::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(identity, Identity::account("7", AccountRole::Farmer));
    }

    #[tokio::test]
    async fn test_extractor_reads_session_header() {
        let request = Request::builder()
            .header(SESSION_HEADER, "abc123")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let identity = Identity::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(
            identity,
            Identity::anonymous_with(SessionToken::parse("abc123").unwrap())
        );
    }
}
