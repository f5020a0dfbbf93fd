//! Rating endpoints under `/api/farms/{farm_id}/ratings`.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};

use super::routes::RouteModule;
use crate::app::AppContext;
use crate::error::{ErrorContext, ErrorWithContext, FarmgateError};
use crate::identity::{AccountRole, Identity, SESSION_HEADER, lookup_voter, resolve_voter};
use crate::ratings::{RatingAction, RatingValue};
use crate::session::SessionStore;

pub struct RatingsModule;

impl RouteModule for RatingsModule {
    fn routes(&self) -> Router<AppContext> {
        Router::new()
            .route(
                "/{farm_id}/ratings",
                get(rating_summary).post(submit_rating).put(register_farm),
            )
            .route("/{farm_id}/ratings/me", get(my_rating))
            .route("/{farm_id}/ratings/info", get(rating_info))
    }

    fn prefix(&self) -> Option<&str> {
        Some("/api/farms")
    }
}

#[derive(Debug, Deserialize)]
struct RateRequest {
    rating: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct RateResponse {
    average_rating: f64,
    rating_count: usize,
    action: RatingAction,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct SummaryResponse {
    average_rating: f64,
    rating_count: usize,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    farm_id: String,
    average_rating: f64,
    rating_count: usize,
}

#[derive(Debug, Serialize)]
struct MyRatingResponse {
    rating: Option<u8>,
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    average_rating: f64,
    rating_count: usize,
    your_rating: Option<u8>,
}

/// Integers, or strings holding an integer, are accepted.
fn parse_rating(raw: Option<&serde_json::Value>) -> Result<RatingValue, ErrorWithContext> {
    let invalid = |reason: &str| {
        FarmgateError::validation("Invalid rating")
            .with_context(ErrorContext::new().with_field_error("rating", reason))
    };

    let number = match raw {
        None | Some(serde_json::Value::Null) => return Err(invalid("is required")),
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    let number = number.ok_or_else(|| invalid("must be a whole number"))?;

    RatingValue::parse(number).map_err(|_| invalid("must be between 0 and 5"))
}

/// `POST /api/farms/{farm_id}/ratings`
async fn submit_rating(
    State(ctx): State<AppContext>,
    Path(farm_id): Path<String>,
    identity: Identity,
    body: Bytes,
) -> Result<Response, ErrorWithContext> {
    let request: RateRequest = serde_json::from_slice(&body).map_err(FarmgateError::from)?;
    let value = parse_rating(request.rating.as_ref())?;

    // Unknown farms are rejected before a voter session is issued.
    ctx.ratings.rating_summary(&farm_id).await?;

    let voter = resolve_voter(&identity, ctx.sessions.as_ref()).await?;
    let outcome = match ctx.ratings.submit_rating(&farm_id, &voter.voter_id, value).await {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Some(token) = &voter.issued_session {
                if let Err(revoke_err) = ctx.sessions.revoke(token).await {
                    tracing::warn!(error = %revoke_err, "Could not revoke unused voter session");
                }
            }
            return Err(err.into());
        }
    };

    let message = match outcome.action {
        RatingAction::Added => "Rating added",
        RatingAction::Updated => "Rating updated",
        RatingAction::Removed => "Rating removed",
        RatingAction::None => "No rating to remove",
    };
    let mut response = (
        StatusCode::OK,
        Json(RateResponse {
            average_rating: outcome.average,
            rating_count: outcome.count,
            action: outcome.action,
            message,
        }),
    )
        .into_response();

    if let Some(token) = voter.issued_session {
        match HeaderValue::from_str(token.as_str()) {
            Ok(value) => {
                response.headers_mut().insert(SESSION_HEADER, value);
            }
            Err(_) => tracing::warn!("Issued session token is not a valid header value"),
        }
    }
    Ok(response)
}

/// `PUT /api/farms/{farm_id}/ratings`
///
/// Opens a farm for rating. Admin only; repeating it keeps existing ratings.
async fn register_farm(
    State(ctx): State<AppContext>,
    Path(farm_id): Path<String>,
    identity: Identity,
) -> crate::Result<Json<RegisterResponse>> {
    match identity {
        Identity::Account { role: AccountRole::Admin, .. } => {}
        Identity::Account { .. } => {
            return Err(FarmgateError::permission_denied("Only admins can register farms"));
        }
        Identity::Anonymous { .. } => {
            return Err(FarmgateError::unauthorized("Sign in to register farms"));
        }
    }

    let summary = ctx.ratings.register_entity(&farm_id).await?;
    Ok(Json(RegisterResponse {
        farm_id,
        average_rating: summary.average,
        rating_count: summary.count,
    }))
}

/// `GET /api/farms/{farm_id}/ratings`
async fn rating_summary(
    State(ctx): State<AppContext>,
    Path(farm_id): Path<String>,
) -> crate::Result<Json<SummaryResponse>> {
    let summary = ctx.ratings.rating_summary(&farm_id).await?;
    Ok(Json(SummaryResponse {
        average_rating: summary.average,
        rating_count: summary.count,
    }))
}

/// `GET /api/farms/{farm_id}/ratings/me`
async fn my_rating(
    State(ctx): State<AppContext>,
    Path(farm_id): Path<String>,
    identity: Identity,
) -> crate::Result<Json<MyRatingResponse>> {
    let rating = match lookup_voter(&identity, ctx.sessions.as_ref()).await? {
        Some(voter) => ctx.ratings.voter_rating(&farm_id, &voter).await?,
        None => {
            // Still 404 for unknown farms.
            ctx.ratings.rating_summary(&farm_id).await?;
            None
        }
    };
    Ok(Json(MyRatingResponse { rating }))
}

/// `GET /api/farms/{farm_id}/ratings/info`
async fn rating_info(
    State(ctx): State<AppContext>,
    Path(farm_id): Path<String>,
    identity: Identity,
) -> crate::Result<Json<InfoResponse>> {
    let voter = lookup_voter(&identity, ctx.sessions.as_ref()).await?;
    let info = ctx.ratings.rating_info(&farm_id, voter.as_ref()).await?;
    Ok(Json(InfoResponse {
        average_rating: info.average,
        rating_count: info.count,
        your_rating: info.voter_rating,
    }))
}
