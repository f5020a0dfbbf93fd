use chrono::{Duration, Utc};

use crate::app::AppContext;
use crate::subscriptions::{
    PaymentMethod, Subscription, SubscriptionPlan, SubscriptionStatus, SubscriptionStore,
};

/// A trial that ends `remaining` from now.
pub fn trial_ending_in(owner_id: &str, remaining: Duration) -> Subscription {
    let now = Utc::now();
    let mut subscription = Subscription::new_trial(owner_id, now - Duration::days(1), 1);
    subscription.end_date = now + remaining;
    subscription
}

/// A trial that has already been expired by the sweep.
pub fn expired_trial(owner_id: &str) -> Subscription {
    let now = Utc::now();
    let mut subscription = Subscription::new_trial(owner_id, now - Duration::days(40), 30);
    subscription.status = SubscriptionStatus::Expired;
    subscription.is_active = false;
    subscription
}

/// An active paid subscription billed through M-Pesa.
pub fn active_subscription(owner_id: &str, plan: SubscriptionPlan) -> Subscription {
    Subscription::new_paid(
        owner_id,
        plan,
        PaymentMethod::Mpesa,
        Some("254712345678".to_string()),
        Utc::now(),
        365,
        30,
    )
}

/// Insert a subscription directly into the context's store.
///
/// Panics if the owner already has one.
pub async fn seed_subscription(ctx: &AppContext, subscription: Subscription) -> Subscription {
    let inserted = ctx
        .subscription_store
        .insert(&subscription)
        .await
        .expect("subscription store failed");
    assert!(inserted, "owner {} already has a subscription", subscription.owner_id);
    subscription
}
