use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::collections::HashMap;

use crate::subscriptions::SubscriptionStatus;

/// The main error type for farmgate operations
#[derive(Debug, thiserror::Error)]
pub enum FarmgateError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Payment required: {message}")]
    PaymentRequired {
        message: String,
        detail: PaymentRequiredDetail,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Structured detail attached to a payment-required denial so the client
/// can decide whether to subscribe, pay, or wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRequiredDetail {
    /// Status of the subscription, if one exists.
    pub subscription_status: Option<SubscriptionStatus>,
    /// Whole days left on the current term (0 when nothing remains).
    pub days_remaining: i64,
    /// True when the account has no subscription at all.
    pub requires_subscription: bool,
}

impl PaymentRequiredDetail {
    pub fn subscription_required() -> Self {
        Self {
            subscription_status: None,
            days_remaining: 0,
            requires_subscription: true,
        }
    }

    pub fn inactive(status: SubscriptionStatus, days_remaining: i64) -> Self {
        Self {
            subscription_status: Some(status),
            days_remaining,
            requires_subscription: false,
        }
    }
}

/// Error context for additional error information
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: Option<String>,
    /// Additional error details
    pub details: Option<String>,
    /// Contextual key-value pairs
    pub context: HashMap<String, String>,
    /// Field-specific validation errors
    pub field_errors: HashMap<String, Vec<String>>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error_id(mut self, id: impl Into<String>) -> Self {
        self.error_id = Some(id.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details = Some(detail.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_field_error(mut self, field: impl Into<String>, error: impl Into<String>) -> Self {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(error.into());
        self
    }
}

/// Error with attached context
///
/// Handlers that want to report field errors return this type; every
/// `FarmgateError` converts into it with an empty context, so `?` keeps working.
#[derive(Debug)]
pub struct ErrorWithContext {
    error: FarmgateError,
    context: ErrorContext,
}

impl ErrorWithContext {
    pub fn new(error: FarmgateError, context: ErrorContext) -> Self {
        Self { error, context }
    }

    pub fn error(&self) -> &FarmgateError {
        &self.error
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }
}

impl std::fmt::Display for ErrorWithContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(ref details) = self.context.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorWithContext {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<ErrorWithContext> for FarmgateError {
    fn from(err: ErrorWithContext) -> Self {
        err.error
    }
}

impl From<FarmgateError> for ErrorWithContext {
    fn from(error: FarmgateError) -> Self {
        Self::new(error, ErrorContext::default())
    }
}

impl IntoResponse for ErrorWithContext {
    fn into_response(self) -> Response {
        self.error.into_response_with_context(Some(self.context))
    }
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
    error_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    field_errors: Option<HashMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscription_status: Option<SubscriptionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    days_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    requires_subscription: Option<bool>,
}

impl FarmgateError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn payment_required(msg: impl Into<String>, detail: PaymentRequiredDetail) -> Self {
        Self::PaymentRequired {
            message: msg.into(),
            detail,
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Add context to this error, returning an ErrorWithContext
    ///
    /// ```rust
    /// use farmgate::{ErrorContext, FarmgateError};
    ///
    /// let err = FarmgateError::validation("Invalid rating")
    ///     .with_context(ErrorContext::new().with_field_error("rating", "must be between 0 and 5"));
    /// assert_eq!(err.context().field_errors["rating"].len(), 1);
    /// ```
    pub fn with_context(self, context: ErrorContext) -> ErrorWithContext {
        ErrorWithContext::new(self, context)
    }

    /// Convert error to a JSON response, merging any attached context.
    ///
    /// Server-side failures are logged in full but only a generic message
    /// reaches the client.
    pub fn into_response_with_context(self, context: Option<ErrorContext>) -> Response {
        let status = self.status_code();

        let mut response = ErrorResponse {
            error: self.safe_message(),
            error_id: String::new(),
            details: None,
            context: None,
            field_errors: None,
            subscription_status: None,
            days_remaining: None,
            requires_subscription: None,
        };

        let mut error_id = None;
        if let Some(context) = context {
            error_id = context.error_id;
            response.details = context.details;
            if !context.context.is_empty() {
                response.context = Some(context.context);
            }
            if !context.field_errors.is_empty() {
                response.field_errors = Some(context.field_errors);
            }
        }

        if let Self::PaymentRequired { detail, .. } = &self {
            response.subscription_status = detail.subscription_status;
            response.days_remaining = Some(detail.days_remaining);
            response.requires_subscription = Some(detail.requires_subscription);
        }

        let error_id = error_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        response.error_id = error_id.clone();

        if status.is_server_error() {
            tracing::error!(
                status = status.as_u16(),
                error_id = %error_id,
                error = %self,
                "Request failed"
            );
        } else {
            tracing::debug!(
                status = status.as_u16(),
                error_id = %error_id,
                error = %self,
                "Request rejected"
            );
        }

        (status, Json(response)).into_response()
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::PaymentRequired { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) | Self::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for client responses.
    ///
    /// Client errors (4xx) carry their message; server errors are reduced
    /// to a generic string.
    fn safe_message(&self) -> String {
        match self {
            Self::NotFound(_)
            | Self::Validation(_)
            | Self::Unauthorized(_)
            | Self::PermissionDenied(_)
            | Self::Conflict(_) => self.to_string(),
            Self::PaymentRequired { message, .. } => message.clone(),
            Self::Internal(_) | Self::Anyhow(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for FarmgateError {
    fn into_response(self) -> Response {
        self.into_response_with_context(None)
    }
}

/// Result type alias for farmgate operations
pub type Result<T> = std::result::Result<T, FarmgateError>;

impl From<serde_json::Error> for FarmgateError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            FarmgateError::Validation(format!("JSON error: {}", err))
        } else {
            FarmgateError::Internal(format!("JSON serialization error: {}", err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(FarmgateError::not_found("farm").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(FarmgateError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(FarmgateError::unauthorized("x").status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(FarmgateError::permission_denied("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(FarmgateError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            FarmgateError::payment_required("x", PaymentRequiredDetail::subscription_required())
                .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(FarmgateError::internal("x").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_display() {
        assert_eq!(FarmgateError::not_found("Farm 7").to_string(), "Not found: Farm 7");
        assert_eq!(
            FarmgateError::validation("Rating out of range").to_string(),
            "Validation failed: Rating out of range"
        );
    }

    #[test]
    fn test_error_with_context_display() {
        let err = FarmgateError::validation("Invalid rating")
            .with_context(ErrorContext::new().with_detail("got 9"));
        assert_eq!(err.to_string(), "Validation failed: Invalid rating (got 9)");

        let inner: FarmgateError = err.into();
        assert!(matches!(inner, FarmgateError::Validation(_)));
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let response = FarmgateError::internal("lock poisoned in rating store").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"], "Internal server error");
        assert!(json["error_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_payment_required_body() {
        let response = FarmgateError::payment_required(
            "Your subscription has expired",
            PaymentRequiredDetail::inactive(SubscriptionStatus::Expired, 0),
        )
        .into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        let json = body_json(response).await;
        assert_eq!(json["error"], "Your subscription has expired");
        assert_eq!(json["subscription_status"], "expired");
        assert_eq!(json["days_remaining"], 0);
        assert_eq!(json["requires_subscription"], false);
    }

    #[tokio::test]
    async fn test_field_errors_in_body() {
        let response = FarmgateError::validation("Invalid rating")
            .with_context(
                ErrorContext::new()
                    .with_error_id("err-1")
                    .with_field_error("rating", "must be between 0 and 5"),
            )
            .into_response();

        let json = body_json(response).await;
        assert_eq!(json["error_id"], "err-1");
        assert_eq!(json["field_errors"]["rating"][0], "must be between 0 and 5");
    }

    #[test]
    fn test_json_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let converted: FarmgateError = err.into();
        assert!(matches!(converted, FarmgateError::Validation(_)));
    }
}
