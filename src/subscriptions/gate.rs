//! Request-time enforcement of subscription access.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::access::{can_access, days_remaining};
use super::model::{Subscription, SubscriptionStatus};
use super::storage::SubscriptionStore;
use crate::error::{FarmgateError, PaymentRequiredDetail, Result};
use crate::identity::Identity;

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The account has never subscribed.
    SubscriptionRequired,
    /// The account's subscription does not currently grant access.
    SubscriptionInactive {
        status: SubscriptionStatus,
        days_remaining: i64,
    },
}

impl DenyReason {
    /// The 402 error sent back to the client.
    pub fn into_error(self) -> FarmgateError {
        match self {
            Self::SubscriptionRequired => FarmgateError::payment_required(
                "Subscription required. Please subscribe to access farmer features.",
                PaymentRequiredDetail::subscription_required(),
            ),
            Self::SubscriptionInactive {
                status,
                days_remaining,
            } => {
                let message = match status {
                    SubscriptionStatus::Trial => "Your free trial has ended. Please subscribe to continue.",
                    SubscriptionStatus::PaymentPending => {
                        "Your last payment failed. Please update your payment to continue."
                    }
                    SubscriptionStatus::Canceled => "Your subscription was canceled.",
                    SubscriptionStatus::Active | SubscriptionStatus::Expired => {
                        "Your subscription is not active. Please renew to continue."
                    }
                };
                FarmgateError::payment_required(
                    message,
                    PaymentRequiredDetail::inactive(status, days_remaining),
                )
            }
        }
    }
}

/// Decide access for a gated account given its subscription, if any.
pub fn decide(subscription: Option<&Subscription>, now: DateTime<Utc>) -> GateDecision {
    match subscription {
        None => GateDecision::Deny(DenyReason::SubscriptionRequired),
        Some(sub) if can_access(sub, now) => GateDecision::Allow,
        Some(sub) => GateDecision::Deny(DenyReason::SubscriptionInactive {
            status: sub.status,
            days_remaining: days_remaining(sub, now),
        }),
    }
}

/// Blocks farmers without a usable subscription from non-exempt paths.
pub struct SubscriptionGate<S: SubscriptionStore> {
    store: S,
    exempt_paths: Vec<String>,
}

impl<S: SubscriptionStore> SubscriptionGate<S> {
    pub fn new(store: S, exempt_paths: Vec<String>) -> Self {
        Self { store, exempt_paths }
    }

    /// Whether `path` sits under an exempt prefix.
    ///
    /// A prefix `/api/subscriptions/` also covers `/api/subscriptions` itself.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|prefix| {
            path.starts_with(prefix.as_str()) || path == prefix.trim_end_matches('/')
        })
    }

    pub async fn enforce_access(&self, identity: &Identity, path: &str) -> Result<GateDecision> {
        if self.is_exempt(path) {
            return Ok(GateDecision::Allow);
        }

        let Identity::Account { account_id, role } = identity else {
            return Ok(GateDecision::Allow);
        };
        if !role.requires_subscription() {
            return Ok(GateDecision::Allow);
        }

        let subscription = self.store.get_by_owner(account_id).await?;
        let decision = decide(subscription.as_ref(), Utc::now());
        if let GateDecision::Deny(reason) = decision {
            tracing::debug!(
                target: "farmgate::gate",
                account_id = %account_id,
                path = %path,
                reason = ?reason,
                "Subscription gate denied request"
            );
        }
        Ok(decision)
    }

    /// Axum middleware running the gate before the handler.
    ///
    /// ```rust,ignore
    /// let gate = Arc::new(SubscriptionGate::new(store, config.subscriptions.exempt_paths));
    /// let app = router.layer(axum::middleware::from_fn_with_state(gate, SubscriptionGate::middleware));
    /// ```
    pub async fn middleware(
        State(gate): State<Arc<Self>>,
        identity: Identity,
        request: Request,
        next: Next,
    ) -> std::result::Result<Response, FarmgateError> {
        match gate.enforce_access(&identity, request.uri().path()).await? {
            GateDecision::Allow => Ok(next.run(request).await),
            GateDecision::Deny(reason) => Err(reason.into_error()),
        }
    }
}
