//! Rating endpoints driven through the full router.

use std::sync::Arc;
use std::time::Duration;

use farmgate::ratings::InMemoryRatingStore;
use farmgate::session::InMemorySessionStore;
use farmgate::subscriptions::InMemorySubscriptionStore;
use farmgate::testing::{self, ScenarioAssert};
use farmgate::{App, AppContext, Config, SESSION_HEADER};
use serde_json::{Value, json};

async fn setup() -> AppContext {
    let ctx = AppContext::in_memory(Config::default());
    ctx.ratings.register_entity("farm-1").await.unwrap();
    ctx
}

fn router(ctx: &AppContext) -> axum::Router {
    App::new(ctx.clone()).into_router()
}

async fn rate_as(ctx: &AppContext, account_id: &str, rating: Value) -> ScenarioAssert {
    testing::post(router(ctx), "/api/farms/farm-1/ratings")
        .as_consumer(account_id)
        .json_body(&json!({ "rating": rating }))
        .execute()
        .await
}

#[tokio::test]
async fn test_rating_scenario() {
    let ctx = setup().await;

    rate_as(&ctx, "1", json!(4))
        .await
        .assert_ok()
        .assert_json_field("average_rating", json!(4.0))
        .await
        .assert_json_field("rating_count", json!(1))
        .await
        .assert_json_field("action", json!("added"))
        .await;

    rate_as(&ctx, "2", json!(2))
        .await
        .assert_ok()
        .assert_json_field("average_rating", json!(3.0))
        .await
        .assert_json_field("rating_count", json!(2))
        .await;

    rate_as(&ctx, "1", json!(0))
        .await
        .assert_ok()
        .assert_json_field("average_rating", json!(2.0))
        .await
        .assert_json_field("rating_count", json!(1))
        .await
        .assert_json_field("action", json!("removed"))
        .await;

    testing::get(router(&ctx), "/api/farms/farm-1/ratings")
        .execute()
        .await
        .assert_ok()
        .assert_json_field("average_rating", json!(2.0))
        .await
        .assert_json_field("rating_count", json!(1))
        .await;
}

#[tokio::test]
async fn test_resubmission_replaces_rating() {
    let ctx = setup().await;

    rate_as(&ctx, "1", json!(5)).await.assert_ok();
    rate_as(&ctx, "1", json!("3"))
        .await
        .assert_ok()
        .assert_json_field("average_rating", json!(3.0))
        .await
        .assert_json_field("rating_count", json!(1))
        .await
        .assert_json_field("action", json!("updated"))
        .await;

    testing::get(router(&ctx), "/api/farms/farm-1/ratings/me")
        .as_consumer("1")
        .execute()
        .await
        .assert_ok()
        .assert_json_field("rating", json!(3))
        .await;
}

#[tokio::test]
async fn test_anonymous_voter_receives_session() {
    let ctx = setup().await;

    let first = testing::post(router(&ctx), "/api/farms/farm-1/ratings")
        .json_body(&json!({ "rating": 4 }))
        .execute()
        .await
        .assert_ok();
    let token = first.header(SESSION_HEADER).expect("session header issued");

    // Same session resubmitting replaces its rating and gets no new token.
    testing::post(router(&ctx), "/api/farms/farm-1/ratings")
        .with_session(&token)
        .json_body(&json!({ "rating": 2 }))
        .execute()
        .await
        .assert_ok()
        .assert_no_header(SESSION_HEADER)
        .assert_json_field("rating_count", json!(1))
        .await
        .assert_json_field("average_rating", json!(2.0))
        .await;

    testing::get(router(&ctx), "/api/farms/farm-1/ratings/info")
        .with_session(&token)
        .execute()
        .await
        .assert_ok()
        .assert_json_field("your_rating", json!(2))
        .await;

    // A different anonymous visitor is a different voter.
    testing::post(router(&ctx), "/api/farms/farm-1/ratings")
        .json_body(&json!({ "rating": 4 }))
        .execute()
        .await
        .assert_ok()
        .assert_json_field("rating_count", json!(2))
        .await
        .assert_json_field("average_rating", json!(3.0))
        .await;
}

#[tokio::test]
async fn test_read_without_session_does_not_issue_one() {
    let ctx = setup().await;

    testing::get(router(&ctx), "/api/farms/farm-1/ratings/me")
        .execute()
        .await
        .assert_ok()
        .assert_no_header(SESSION_HEADER)
        .assert_json_field("rating", Value::Null)
        .await;
}

#[tokio::test]
async fn test_invalid_ratings_rejected() {
    let ctx = setup().await;

    for bad in [json!(6), json!(-1), json!(3.5), json!("five"), Value::Null] {
        rate_as(&ctx, "1", bad)
            .await
            .assert_bad_request()
            .assert_json_field("error", json!("Validation failed: Invalid rating"))
            .await;
    }

    testing::post(router(&ctx), "/api/farms/farm-1/ratings")
        .as_consumer("1")
        .text_body("not json")
        .execute()
        .await
        .assert_bad_request();

    testing::get(router(&ctx), "/api/farms/farm-1/ratings")
        .execute()
        .await
        .assert_json_field("rating_count", json!(0))
        .await;
}

#[tokio::test]
async fn test_unknown_farm_is_not_found() {
    let ctx = setup().await;

    rate_as(&ctx, "1", json!(4)).await.assert_ok();
    testing::post(router(&ctx), "/api/farms/farm-404/ratings")
        .as_consumer("1")
        .json_body(&json!({ "rating": 4 }))
        .execute()
        .await
        .assert_not_found();

    testing::get(router(&ctx), "/api/farms/farm-404/ratings")
        .execute()
        .await
        .assert_not_found();
}

#[tokio::test]
async fn test_clearing_without_rating_is_a_no_op() {
    let ctx = setup().await;

    rate_as(&ctx, "1", json!(0))
        .await
        .assert_ok()
        .assert_json_field("action", json!("none"))
        .await
        .assert_json_field("rating_count", json!(0))
        .await
        .assert_json_field("average_rating", json!(0.0))
        .await;
}

#[tokio::test]
async fn test_anonymous_vote_for_unknown_farm_issues_no_session() {
    let sessions = InMemorySessionStore::new(Duration::from_secs(3600));
    let ctx = AppContext::new(
        Config::default(),
        Arc::new(InMemoryRatingStore::new()),
        Arc::new(InMemorySubscriptionStore::new()),
        Arc::new(sessions.clone()),
    );

    testing::post(router(&ctx), "/api/farms/farm-404/ratings")
        .json_body(&json!({ "rating": 4 }))
        .execute()
        .await
        .assert_not_found()
        .assert_no_header(SESSION_HEADER);
    assert!(sessions.is_empty().await);

    ctx.ratings.register_entity("farm-1").await.unwrap();
    testing::post(router(&ctx), "/api/farms/farm-1/ratings")
        .json_body(&json!({ "rating": 4 }))
        .execute()
        .await
        .assert_ok();
    assert_eq!(sessions.len().await, 1);
}

#[tokio::test]
async fn test_admin_registers_farm() {
    let ctx = AppContext::in_memory(Config::default());

    testing::put(router(&ctx), "/api/farms/farm-7/ratings")
        .execute()
        .await
        .assert_unauthorized();
    testing::put(router(&ctx), "/api/farms/farm-7/ratings")
        .as_consumer("1")
        .execute()
        .await
        .assert_forbidden();
    testing::get(router(&ctx), "/api/farms/farm-7/ratings")
        .execute()
        .await
        .assert_not_found();

    testing::put(router(&ctx), "/api/farms/farm-7/ratings")
        .as_admin("root")
        .execute()
        .await
        .assert_ok()
        .assert_json_field("farm_id", json!("farm-7"))
        .await
        .assert_json_field("rating_count", json!(0))
        .await;

    testing::post(router(&ctx), "/api/farms/farm-7/ratings")
        .as_consumer("1")
        .json_body(&json!({ "rating": 5 }))
        .execute()
        .await
        .assert_ok();

    // Registering again keeps the ratings.
    testing::put(router(&ctx), "/api/farms/farm-7/ratings")
        .as_admin("root")
        .execute()
        .await
        .assert_ok()
        .assert_json_field("rating_count", json!(1))
        .await
        .assert_json_field("average_rating", json!(5.0))
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_votes_are_all_counted() {
    let ctx = setup().await;

    let tasks: Vec<_> = (0..24)
        .map(|n| {
            let ctx = ctx.clone();
            tokio::spawn(async move { rate_as(&ctx, &n.to_string(), json!(n % 5 + 1)).await.status() })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), axum::http::StatusCode::OK);
    }

    testing::get(router(&ctx), "/api/farms/farm-1/ratings")
        .execute()
        .await
        .assert_ok()
        .assert_json_field("rating_count", json!(24))
        .await;
}

