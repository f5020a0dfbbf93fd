//! Pure access decisions over a subscription record.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::model::{Subscription, SubscriptionStatus};
use crate::identity::AccountRole;

/// Whether the subscription currently grants access to paid features.
pub fn can_access(subscription: &Subscription, now: DateTime<Utc>) -> bool {
    match subscription.status {
        SubscriptionStatus::Trial => subscription.end_date > now,
        SubscriptionStatus::Active => subscription
            .next_billing_date
            .is_none_or(|due| due > now),
        SubscriptionStatus::Expired
        | SubscriptionStatus::Canceled
        | SubscriptionStatus::PaymentPending => false,
    }
}

/// Whole days left in the current trial or billing period, never negative.
pub fn days_remaining(subscription: &Subscription, now: DateTime<Utc>) -> i64 {
    let until = match subscription.status {
        SubscriptionStatus::Trial => Some(subscription.end_date),
        SubscriptionStatus::Active => subscription.next_billing_date,
        _ => None,
    };
    until.map_or(0, |until| (until - now).num_days().max(0))
}

/// Access summary returned to clients asking "can I use the service?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessReport {
    pub has_access: bool,
    pub requires_subscription: bool,
    pub subscription_status: Option<SubscriptionStatus>,
    pub days_remaining: i64,
    pub message: String,
}

/// Build the access summary for an account.
pub fn access_report(
    role: AccountRole,
    subscription: Option<&Subscription>,
    now: DateTime<Utc>,
) -> AccessReport {
    if !role.requires_subscription() {
        return AccessReport {
            has_access: true,
            requires_subscription: false,
            subscription_status: None,
            days_remaining: 0,
            message: format!("No subscription needed for {} accounts", role),
        };
    }

    let Some(subscription) = subscription else {
        return AccessReport {
            has_access: false,
            requires_subscription: true,
            subscription_status: None,
            days_remaining: 0,
            message: "A subscription is required to access this service".to_string(),
        };
    };

    let has_access = can_access(subscription, now);
    let days = days_remaining(subscription, now);
    let message = match (subscription.status, has_access) {
        (SubscriptionStatus::Trial, true) => format!("Free trial: {} days remaining", days),
        (SubscriptionStatus::Trial, false) => "Your free trial has ended".to_string(),
        (SubscriptionStatus::Active, true) => "Subscription active".to_string(),
        (SubscriptionStatus::Active, false) => "Your subscription payment is due".to_string(),
        (SubscriptionStatus::PaymentPending, _) => "Your last payment failed".to_string(),
        (SubscriptionStatus::Expired, _) => "Your subscription has expired".to_string(),
        (SubscriptionStatus::Canceled, _) => "Your subscription was canceled".to_string(),
    };

    AccessReport {
        has_access,
        requires_subscription: true,
        subscription_status: Some(subscription.status),
        days_remaining: days,
        message,
    }
}
