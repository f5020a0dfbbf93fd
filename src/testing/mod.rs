//! Testing utilities for farmgate
//!
//! - Alba-style HTTP scenarios driven through `tower::ServiceExt::oneshot`
//! - Subscription fixtures for seeding a context
//!
//! # Example
//!
//! ```rust,ignore
//! use farmgate::{App, AppContext, Config, testing};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn rates_a_farm() {
//!     let ctx = AppContext::in_memory(Config::default());
//!     ctx.ratings.register_entity("farm-1").await.unwrap();
//!
//!     testing::post(App::new(ctx).into_router(), "/api/farms/farm-1/ratings")
//!         .as_consumer("42")
//!         .json_body(&json!({ "rating": 4 }))
//!         .execute()
//!         .await
//!         .assert_ok()
//!         .assert_json_field("average_rating", json!(4.0))
//!         .await;
//! }
//! ```

mod fixtures;
mod scenario;

pub use fixtures::{active_subscription, expired_trial, seed_subscription, trial_ending_in};
pub use scenario::{Scenario, ScenarioAssert, delete, get, patch, post, put};
