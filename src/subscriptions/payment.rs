//! Payment requests and the external payment gateway.

use async_trait::async_trait;
use serde::Deserialize;

use super::error::SubscriptionError;
use super::model::{PaymentMethod, SubscriptionPlan};
use crate::error::Result;

/// A payment submitted by a farmer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentRequest {
    pub amount_cents: i64,
    pub method: PaymentMethod,
    /// Switch to this plan as part of the payment.
    #[serde(default)]
    pub plan: Option<SubscriptionPlan>,
    #[serde(default)]
    pub mpesa_number: Option<String>,
    /// Reference from the payment provider, generated when absent.
    #[serde(default)]
    pub transaction_id: Option<String>,
}

impl PaymentRequest {
    pub fn new(amount_cents: i64, method: PaymentMethod) -> Self {
        Self {
            amount_cents,
            method,
            plan: None,
            mpesa_number: None,
            transaction_id: None,
        }
    }

    pub fn with_plan(mut self, plan: SubscriptionPlan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_mpesa_number(mut self, number: impl Into<String>) -> Self {
        self.mpesa_number = Some(number.into());
        self
    }

    pub fn validate(&self) -> std::result::Result<(), SubscriptionError> {
        if self.amount_cents <= 0 {
            return Err(SubscriptionError::InvalidPayment {
                reason: "amount must be greater than zero".to_string(),
            });
        }
        validate_method_details(self.method, self.mpesa_number.as_deref())
    }
}

/// Check the details a payment method needs are present and well formed.
pub fn validate_method_details(
    method: PaymentMethod,
    mpesa_number: Option<&str>,
) -> std::result::Result<(), SubscriptionError> {
    if method != PaymentMethod::Mpesa {
        return Ok(());
    }
    let number = mpesa_number.map(str::trim).unwrap_or_default();
    if number.is_empty() {
        return Err(SubscriptionError::InvalidPayment {
            reason: "M-Pesa payments need a phone number".to_string(),
        });
    }
    let digits = number.strip_prefix('+').unwrap_or(number);
    if !(9..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(SubscriptionError::InvalidPayment {
            reason: format!("'{}' is not a valid M-Pesa number", number),
        });
    }
    Ok(())
}

/// A charge against a stored payment method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub subscription_id: String,
    pub owner_id: String,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub mpesa_number: Option<String>,
    pub description: String,
}

/// What the gateway said about a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approved { transaction_id: String },
    Declined { reason: String },
}

/// External payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Attempt a charge. Transport failures are errors; a refusal is `Declined`.
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome>;
}

/// Gateway that approves every charge. Suitable for development and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovingGateway;

#[async_trait]
impl PaymentGateway for ApprovingGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome> {
        let transaction_id = format!("TXN-{}", uuid::Uuid::new_v4().simple());
        tracing::debug!(
            target: "farmgate::payments",
            subscription_id = %request.subscription_id,
            amount_cents = request.amount_cents,
            method = %request.method,
            transaction_id = %transaction_id,
            "Charge approved"
        );
        Ok(ChargeOutcome::Approved { transaction_id })
    }
}
