//! Subscription records and the lifecycle state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::SubscriptionError;

/// Subscription plans offered to farmers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionPlan {
    FreeTrial,
    Basic,
    Premium,
    Enterprise,
}

impl SubscriptionPlan {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FreeTrial => "free_trial",
            Self::Basic => "basic",
            Self::Premium => "premium",
            Self::Enterprise => "enterprise",
        }
    }

    pub fn is_paid(self) -> bool {
        !matches!(self, Self::FreeTrial)
    }
}

impl fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    Expired,
    Canceled,
    PaymentPending,
}

/// Inputs that move a subscription between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionEvent {
    PaymentReceived,
    PaymentFailed,
    TrialExpired,
    CancelRequested,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Canceled => "canceled",
            Self::PaymentPending => "payment_pending",
        }
    }

    /// The status reached by applying `event`, if the move is allowed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` for any pair outside the lifecycle table.
    pub fn transition(self, event: SubscriptionEvent) -> Result<Self, SubscriptionError> {
        use SubscriptionEvent as E;
        use SubscriptionStatus as S;

        match (self, event) {
            (S::Trial | S::Active | S::Expired | S::PaymentPending, E::PaymentReceived) => Ok(S::Active),
            (S::Trial, E::TrialExpired) => Ok(S::Expired),
            (S::Active, E::CancelRequested) => Ok(S::Canceled),
            (S::Active, E::PaymentFailed) => Ok(S::PaymentPending),
            (from, event) => Err(SubscriptionError::InvalidTransition { from, event }),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SubscriptionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PaymentReceived => "payment_received",
            Self::PaymentFailed => "payment_failed",
            Self::TrialExpired => "trial_expired",
            Self::CancelRequested => "cancel_requested",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Mpesa,
    Bank,
    Card,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mpesa => "mpesa",
            Self::Bank => "bank",
            Self::Card => "card",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minutes a billing claim blocks other charges before it is treated as
/// abandoned.
pub const BILLING_CLAIM_TIMEOUT_MINUTES: i64 = 15;

/// Marks a charge in flight for a subscription.
///
/// Taken before the gateway is called and cleared once the outcome is
/// saved, so only one caller bills a subscription at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingClaim {
    pub id: String,
    pub claimed_at: DateTime<Utc>,
}

/// A farmer's subscription. One per owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub owner_id: String,
    pub plan: SubscriptionPlan,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub payment_method: Option<PaymentMethod>,
    pub mpesa_number: Option<String>,
    pub trial_ending_notification_sent: bool,
    pub expired_notification_sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_claim: Option<BillingClaim>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every save; used for compare-and-save.
    pub version: u64,
}

impl Subscription {
    /// A free trial running `trial_days` from `now`.
    pub fn new_trial(owner_id: impl Into<String>, now: DateTime<Utc>, trial_days: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            plan: SubscriptionPlan::FreeTrial,
            status: SubscriptionStatus::Trial,
            start_date: now,
            end_date: now + Duration::days(trial_days),
            next_billing_date: None,
            is_active: true,
            payment_method: None,
            mpesa_number: None,
            trial_ending_notification_sent: false,
            expired_notification_sent: false,
            billing_claim: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// A paid subscription, active immediately, billed every `cycle_days`.
    pub fn new_paid(
        owner_id: impl Into<String>,
        plan: SubscriptionPlan,
        payment_method: PaymentMethod,
        mpesa_number: Option<String>,
        now: DateTime<Utc>,
        term_days: i64,
        cycle_days: i64,
    ) -> Self {
        Self {
            plan,
            status: SubscriptionStatus::Active,
            end_date: now + Duration::days(term_days),
            next_billing_date: Some(now + Duration::days(cycle_days)),
            payment_method: Some(payment_method),
            mpesa_number,
            ..Self::new_trial(owner_id, now, term_days)
        }
    }

    /// Check creation-time invariants.
    pub fn validate_new(&self, now: DateTime<Utc>) -> Result<(), SubscriptionError> {
        if self.end_date <= now {
            return Err(SubscriptionError::InvalidSubscription {
                reason: "end date must be in the future".to_string(),
            });
        }
        if self.status == SubscriptionStatus::Active && self.payment_method.is_none() {
            return Err(SubscriptionError::PaymentMethodRequired { plan: self.plan });
        }
        Ok(())
    }

    /// Whether another caller holds an unexpired billing claim.
    pub fn billing_in_progress(&self, now: DateTime<Utc>) -> bool {
        self.billing_claim
            .as_ref()
            .is_some_and(|claim| now - claim.claimed_at < Duration::minutes(BILLING_CLAIM_TIMEOUT_MINUTES))
    }

    /// Take the billing claim, returning its id.
    ///
    /// Fails with `PaymentInProgress` while another claim is live. An
    /// expired claim is replaced.
    pub fn claim_billing(&mut self, now: DateTime<Utc>) -> Result<String, SubscriptionError> {
        if self.billing_in_progress(now) {
            return Err(SubscriptionError::PaymentInProgress {
                subscription_id: self.id.clone(),
            });
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.billing_claim = Some(BillingClaim {
            id: id.clone(),
            claimed_at: now,
        });
        self.updated_at = now;
        Ok(id)
    }

    pub fn holds_claim(&self, claim_id: &str) -> bool {
        self.billing_claim.as_ref().is_some_and(|claim| claim.id == claim_id)
    }

    /// Drop the claim if `claim_id` still holds it.
    pub fn release_claim(&mut self, claim_id: &str) -> bool {
        if !self.holds_claim(claim_id) {
            return false;
        }
        self.billing_claim = None;
        true
    }

    /// Apply a lifecycle event, updating dates and flags to match.
    ///
    /// Returns the previous status.
    pub fn apply(
        &mut self,
        event: SubscriptionEvent,
        now: DateTime<Utc>,
        cycle_days: i64,
    ) -> Result<SubscriptionStatus, SubscriptionError> {
        let previous = self.status;
        let next = previous.transition(event)?;
        let cycle = Duration::days(cycle_days);

        match event {
            SubscriptionEvent::PaymentReceived => {
                // Renewals extend from the current due date unless it has already passed.
                let base = match (previous, self.next_billing_date) {
                    (SubscriptionStatus::Active, Some(due)) if due > now => due,
                    _ => now,
                };
                let next_billing = base + cycle;
                self.next_billing_date = Some(next_billing);
                if self.end_date < next_billing {
                    self.end_date = next_billing;
                }
                self.is_active = true;
            }
            SubscriptionEvent::TrialExpired | SubscriptionEvent::CancelRequested => {
                self.is_active = false;
            }
            SubscriptionEvent::PaymentFailed => {}
        }

        self.status = next;
        self.updated_at = now;
        Ok(previous)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// An immutable payment record attached to a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub subscription_id: String,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub timestamp: DateTime<Utc>,
    pub description: Option<String>,
}

impl Payment {
    pub fn new(
        subscription_id: impl Into<String>,
        amount_cents: i64,
        method: PaymentMethod,
        transaction_id: impl Into<String>,
        status: PaymentStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subscription_id: subscription_id.into(),
            amount_cents,
            method,
            transaction_id: transaction_id.into(),
            status,
            timestamp,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
