//! Subscription and payment endpoints.
//!
//! These live under the gate's exempt prefixes so farmers with a lapsed
//! subscription can still see their status and pay.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;
use serde::Serialize;

use super::routes::RouteModule;
use crate::app::AppContext;
use crate::error::{FarmgateError, Result};
use crate::identity::{AccountRole, Identity};
use crate::subscriptions::{
    AccessReport, NewSubscription, Payment, PaymentReceipt, PaymentRequest, PlanChange, PlanInfo,
    Subscription, can_access, days_remaining,
};

pub struct SubscriptionsModule;

impl RouteModule for SubscriptionsModule {
    fn routes(&self) -> Router<AppContext> {
        Router::new()
            .route(
                "/api/subscriptions",
                get(current_subscription)
                    .post(create_subscription)
                    .patch(change_plan),
            )
            .route("/api/subscriptions/access", get(check_access))
            .route("/api/subscriptions/plans", get(list_plans))
            .route("/api/subscriptions/{subscription_id}/cancel", post(cancel_subscription))
            .route("/api/payments", get(payment_history).post(record_payment))
    }
}

/// A subscription together with its current access state.
#[derive(Debug, Serialize)]
struct SubscriptionView {
    #[serde(flatten)]
    subscription: Subscription,
    has_access: bool,
    days_remaining: i64,
}

impl From<Subscription> for SubscriptionView {
    fn from(subscription: Subscription) -> Self {
        let now = Utc::now();
        Self {
            has_access: can_access(&subscription, now),
            days_remaining: days_remaining(&subscription, now),
            subscription,
        }
    }
}

#[derive(Debug, Serialize)]
struct PaymentView {
    subscription: SubscriptionView,
    payment: Payment,
}

fn require_account(identity: &Identity) -> Result<(&str, AccountRole)> {
    match identity {
        Identity::Account { account_id, role } => Ok((account_id.as_str(), *role)),
        Identity::Anonymous { .. } => Err(FarmgateError::unauthorized("Sign in to manage subscriptions")),
    }
}

fn require_farmer(identity: &Identity) -> Result<&str> {
    let (account_id, role) = require_account(identity)?;
    if !role.requires_subscription() {
        return Err(FarmgateError::permission_denied("Only farmer accounts can subscribe"));
    }
    Ok(account_id)
}

/// `GET /api/subscriptions`
async fn current_subscription(
    State(ctx): State<AppContext>,
    identity: Identity,
) -> Result<Json<SubscriptionView>> {
    let (account_id, _) = require_account(&identity)?;
    let subscription = ctx.subscriptions.get_subscription(account_id).await?;
    Ok(Json(subscription.into()))
}

/// `POST /api/subscriptions`
async fn create_subscription(
    State(ctx): State<AppContext>,
    identity: Identity,
    Json(request): Json<NewSubscription>,
) -> Result<(StatusCode, Json<SubscriptionView>)> {
    let account_id = require_farmer(&identity)?;
    let subscription = ctx.subscriptions.create_subscription(account_id, request).await?;
    Ok((StatusCode::CREATED, Json(subscription.into())))
}

/// `PATCH /api/subscriptions`
async fn change_plan(
    State(ctx): State<AppContext>,
    identity: Identity,
    Json(change): Json<PlanChange>,
) -> Result<Json<SubscriptionView>> {
    let account_id = require_farmer(&identity)?;
    let subscription = ctx.subscriptions.change_plan(account_id, change).await?;
    Ok(Json(subscription.into()))
}

/// `POST /api/subscriptions/{subscription_id}/cancel`
async fn cancel_subscription(
    State(ctx): State<AppContext>,
    Path(subscription_id): Path<String>,
    identity: Identity,
) -> Result<Json<SubscriptionView>> {
    let (account_id, _) = require_account(&identity)?;
    let subscription = ctx
        .subscriptions
        .cancel_subscription(account_id, &subscription_id)
        .await?;
    Ok(Json(subscription.into()))
}

/// `GET /api/subscriptions/access`
async fn check_access(State(ctx): State<AppContext>, identity: Identity) -> Result<Json<AccessReport>> {
    let (account_id, role) = require_account(&identity)?;
    Ok(Json(ctx.subscriptions.check_access(account_id, role).await?))
}

/// `GET /api/subscriptions/plans`
async fn list_plans(State(ctx): State<AppContext>) -> Json<Vec<PlanInfo>> {
    Json(ctx.subscriptions.catalog().plans().to_vec())
}

/// `POST /api/payments`
async fn record_payment(
    State(ctx): State<AppContext>,
    identity: Identity,
    Json(request): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<PaymentView>)> {
    let account_id = require_farmer(&identity)?;
    let PaymentReceipt { subscription, payment } =
        ctx.subscriptions.record_payment(account_id, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(PaymentView {
            subscription: subscription.into(),
            payment,
        }),
    ))
}

/// `GET /api/payments`
async fn payment_history(
    State(ctx): State<AppContext>,
    identity: Identity,
) -> Result<Json<Vec<Payment>>> {
    let (account_id, _) = require_account(&identity)?;
    Ok(Json(ctx.subscriptions.payment_history(account_id).await?))
}
