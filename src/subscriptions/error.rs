//! Subscription-specific error types.

use std::fmt;

use super::model::{SubscriptionEvent, SubscriptionPlan, SubscriptionStatus};
use crate::error::{FarmgateError, PaymentRequiredDetail};

/// Errors raised by subscription operations.
///
/// Converted to `FarmgateError` at the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The owner id is empty or malformed.
    InvalidOwnerId { reason: String },
    /// The subscription record breaks a creation invariant.
    InvalidSubscription { reason: String },
    /// The owner already has a subscription.
    AlreadySubscribed { owner_id: String },
    /// No subscription exists for the owner.
    NoSubscription { owner_id: String },
    /// No subscription exists with the given id.
    SubscriptionNotFound { subscription_id: String },
    /// The caller does not own the subscription.
    NotOwner { subscription_id: String },
    /// The event is not allowed from the current status.
    InvalidTransition {
        from: SubscriptionStatus,
        event: SubscriptionEvent,
    },
    /// Paid plans need a payment method.
    PaymentMethodRequired { plan: SubscriptionPlan },
    /// Payment details failed validation.
    InvalidPayment { reason: String },
    /// The plan change is not allowed.
    InvalidPlanChange { reason: String },
    /// The payment gateway declined a charge.
    PaymentDeclined {
        reason: String,
        status: SubscriptionStatus,
    },
    /// Another charge for the subscription has not finished yet.
    PaymentInProgress { subscription_id: String },
    /// An unexpected internal error occurred.
    Internal { message: String },
}

impl fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOwnerId { reason } => write!(f, "Invalid owner id: {}", reason),
            Self::InvalidSubscription { reason } => write!(f, "Invalid subscription: {}", reason),
            Self::AlreadySubscribed { owner_id } => {
                write!(f, "Account '{}' already has a subscription", owner_id)
            }
            Self::NoSubscription { owner_id } => {
                write!(f, "No subscription found for '{}'", owner_id)
            }
            Self::SubscriptionNotFound { subscription_id } => {
                write!(f, "Subscription not found: {}", subscription_id)
            }
            Self::NotOwner { subscription_id } => {
                write!(f, "You can only manage your own subscription ({})", subscription_id)
            }
            Self::InvalidTransition { from, event } => {
                write!(f, "Cannot apply {} to a {} subscription", event, from)
            }
            Self::PaymentMethodRequired { plan } => {
                write!(f, "Plan '{}' requires a payment method", plan)
            }
            Self::InvalidPayment { reason } => write!(f, "Invalid payment: {}", reason),
            Self::InvalidPlanChange { reason } => write!(f, "Invalid plan change: {}", reason),
            Self::PaymentDeclined { reason, .. } => write!(f, "Payment declined: {}", reason),
            Self::PaymentInProgress { subscription_id } => {
                write!(f, "A payment for subscription '{}' is already in progress", subscription_id)
            }
            Self::Internal { message } => write!(f, "Internal subscription error: {}", message),
        }
    }
}

impl std::error::Error for SubscriptionError {}

impl From<SubscriptionError> for FarmgateError {
    fn from(err: SubscriptionError) -> Self {
        match &err {
            SubscriptionError::NoSubscription { .. }
            | SubscriptionError::SubscriptionNotFound { .. } => FarmgateError::NotFound(err.to_string()),

            SubscriptionError::NotOwner { .. } => FarmgateError::PermissionDenied(err.to_string()),

            SubscriptionError::InvalidOwnerId { .. }
            | SubscriptionError::InvalidSubscription { .. }
            | SubscriptionError::AlreadySubscribed { .. }
            | SubscriptionError::InvalidTransition { .. }
            | SubscriptionError::PaymentMethodRequired { .. }
            | SubscriptionError::InvalidPayment { .. }
            | SubscriptionError::InvalidPlanChange { .. } => FarmgateError::Validation(err.to_string()),

            SubscriptionError::PaymentDeclined { status, .. } => FarmgateError::payment_required(
                err.to_string(),
                PaymentRequiredDetail::inactive(*status, 0),
            ),

            SubscriptionError::PaymentInProgress { .. } => FarmgateError::Conflict(err.to_string()),

            SubscriptionError::Internal { .. } => FarmgateError::Internal(err.to_string()),
        }
    }
}

impl SubscriptionError {
    /// Check if this is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Internal { .. })
    }

    /// Check if the operation may succeed when retried unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PaymentInProgress { .. })
    }
}

/// A charge went through but its outcome could not be saved.
///
/// Retrying must not charge again, so this surfaces as a server error
/// naming the transaction for reconciliation.
pub(crate) fn charged_but_unsaved(subscription_id: &str, transaction_id: &str) -> FarmgateError {
    FarmgateError::internal(format!(
        "Payment {} for subscription {} was taken but could not be applied; reconcile it before retrying",
        transaction_id, subscription_id
    ))
}
