//! The subscription gate in front of the farmer routes.

use chrono::{Duration, Utc};
use farmgate::subscriptions::{SubscriptionPlan, SubscriptionStatus, can_access};
use farmgate::testing::{self, active_subscription, expired_trial, seed_subscription, trial_ending_in};
use farmgate::{App, AppContext, Config, ConfigBuilder};
use serde_json::json;

async fn setup() -> AppContext {
    let ctx = AppContext::in_memory(Config::default());
    ctx.ratings.register_entity("farm-1").await.unwrap();
    ctx
}

fn router(ctx: &AppContext) -> axum::Router {
    App::new(ctx.clone()).into_router()
}

#[tokio::test]
async fn test_farmer_without_subscription_is_refused() {
    let ctx = setup().await;

    testing::get(router(&ctx), "/api/farms/farm-1/ratings")
        .as_farmer("10")
        .execute()
        .await
        .assert_payment_required()
        .assert_json_field("requires_subscription", json!(true))
        .await
        .assert_json_field(
            "error",
            json!("Subscription required. Please subscribe to access farmer features."),
        )
        .await;
}

#[tokio::test]
async fn test_lapsed_trial_is_refused_with_status() {
    let ctx = setup().await;
    seed_subscription(&ctx, trial_ending_in("10", Duration::seconds(-1))).await;

    testing::get(router(&ctx), "/api/farms/farm-1/ratings")
        .as_farmer("10")
        .execute()
        .await
        .assert_payment_required()
        .assert_json_field("subscription_status", json!("trial"))
        .await
        .assert_json_field("days_remaining", json!(0))
        .await
        .assert_json_field("requires_subscription", json!(false))
        .await;
}

#[tokio::test]
async fn test_expired_trial_is_refused() {
    let ctx = setup().await;
    seed_subscription(&ctx, expired_trial("10")).await;

    testing::post(router(&ctx), "/api/farms/farm-1/ratings")
        .as_farmer("10")
        .json_body(&json!({ "rating": 5 }))
        .execute()
        .await
        .assert_payment_required()
        .assert_json_field("subscription_status", json!("expired"))
        .await;

    // Refused before reaching the handler, so nothing was recorded.
    let summary = ctx.ratings.rating_summary("farm-1").await.unwrap();
    assert_eq!(summary.count, 0);
}

#[tokio::test]
async fn test_live_subscriptions_pass() {
    let ctx = setup().await;
    seed_subscription(&ctx, trial_ending_in("10", Duration::days(5))).await;
    seed_subscription(&ctx, active_subscription("11", SubscriptionPlan::Premium)).await;

    for farmer in ["10", "11"] {
        testing::get(router(&ctx), "/api/farms/farm-1/ratings")
            .as_farmer(farmer)
            .execute()
            .await
            .assert_ok();
    }
}

#[tokio::test]
async fn test_other_roles_are_never_gated() {
    let ctx = setup().await;

    testing::get(router(&ctx), "/api/farms/farm-1/ratings")
        .as_consumer("20")
        .execute()
        .await
        .assert_ok();
    testing::get(router(&ctx), "/api/farms/farm-1/ratings")
        .as_admin("30")
        .execute()
        .await
        .assert_ok();
    testing::get(router(&ctx), "/api/farms/farm-1/ratings")
        .execute()
        .await
        .assert_ok();
}

#[tokio::test]
async fn test_exempt_paths_reachable_without_subscription() {
    let ctx = setup().await;
    seed_subscription(&ctx, expired_trial("10")).await;

    testing::get(router(&ctx), "/api/subscriptions")
        .as_farmer("10")
        .execute()
        .await
        .assert_ok()
        .assert_json_field("status", json!("expired"))
        .await
        .assert_json_field("has_access", json!(false))
        .await;

    testing::get(router(&ctx), "/api/subscriptions/access")
        .as_farmer("10")
        .execute()
        .await
        .assert_ok()
        .assert_json_field("has_access", json!(false))
        .await;

    testing::get(router(&ctx), "/api/subscriptions/plans")
        .as_farmer("10")
        .execute()
        .await
        .assert_ok();

    testing::get(router(&ctx), "/health")
        .as_farmer("10")
        .execute()
        .await
        .assert_ok();

    // Exempt but unrouted: the gate lets it through to the 404.
    testing::get(router(&ctx), "/api/auth/login")
        .as_farmer("10")
        .execute()
        .await
        .assert_not_found();
}

#[tokio::test]
async fn test_configured_exempt_paths() {
    let config = ConfigBuilder::new()
        .with_exempt_paths(["/api/farms/"])
        .build()
        .unwrap();
    let ctx = AppContext::in_memory(config);
    ctx.ratings.register_entity("farm-1").await.unwrap();

    testing::get(router(&ctx), "/api/farms/farm-1/ratings")
        .as_farmer("10")
        .execute()
        .await
        .assert_ok();

    // Subscription routes are no longer exempt.
    testing::get(router(&ctx), "/api/subscriptions/plans")
        .as_farmer("10")
        .execute()
        .await
        .assert_payment_required();
}

#[tokio::test]
async fn test_trial_expires_through_sweep() {
    let ctx = setup().await;
    let created = seed_subscription(&ctx, trial_ending_in("10", Duration::days(5))).await;
    assert!(can_access(&created, Utc::now()));

    testing::get(router(&ctx), "/api/farms/farm-1/ratings")
        .as_farmer("10")
        .execute()
        .await
        .assert_ok();

    let grace = ctx.config.subscriptions.grace_period_days;
    let later = Utc::now() + Duration::days(5 + grace) + Duration::hours(1);
    let report = ctx.sweeper().run_once(later).await.unwrap();
    assert_eq!(report.trials_expired, 1);

    let stored = ctx.subscriptions.get_subscription("10").await.unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Expired);
    assert!(!can_access(&stored, later));

    testing::get(router(&ctx), "/api/farms/farm-1/ratings")
        .as_farmer("10")
        .execute()
        .await
        .assert_payment_required()
        .assert_json_field("subscription_status", json!("expired"))
        .await;
}
