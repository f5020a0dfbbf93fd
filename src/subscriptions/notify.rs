//! Farmer-facing notifications about subscription lifecycle events.

use std::future::Future;

use super::model::{Payment, Subscription};

/// Delivers lifecycle notices (email, SMS, in-app) to the subscription owner.
///
/// Delivery failures are the implementation's concern; the sweep records a
/// notice as sent once it has been handed over.
pub trait SubscriptionNotifier: Send + Sync {
    fn trial_ending(
        &self,
        subscription: &Subscription,
        days_left: i64,
    ) -> impl Future<Output = ()> + Send;

    fn subscription_expired(&self, subscription: &Subscription) -> impl Future<Output = ()> + Send;

    fn payment_failed(
        &self,
        subscription: &Subscription,
        payment: &Payment,
    ) -> impl Future<Output = ()> + Send;
}

/// Writes notices to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl SubscriptionNotifier for TracingNotifier {
    async fn trial_ending(&self, subscription: &Subscription, days_left: i64) {
        tracing::info!(
            target: "farmgate::notify",
            owner_id = %subscription.owner_id,
            subscription_id = %subscription.id,
            days_left,
            "Your free trial ends in {} days", days_left
        );
    }

    async fn subscription_expired(&self, subscription: &Subscription) {
        tracing::info!(
            target: "farmgate::notify",
            owner_id = %subscription.owner_id,
            subscription_id = %subscription.id,
            "Your free trial has expired"
        );
    }

    async fn payment_failed(&self, subscription: &Subscription, payment: &Payment) {
        tracing::warn!(
            target: "farmgate::notify",
            owner_id = %subscription.owner_id,
            subscription_id = %subscription.id,
            amount_cents = payment.amount_cents,
            "Your subscription payment failed"
        );
    }
}
