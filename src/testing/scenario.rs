//! Alba-style HTTP testing for the farmgate router
//!
//! Requests run through `tower::ServiceExt::oneshot`, so no server is
//! started. Identities are attached as request extensions the same way an
//! upstream auth layer would.

use axum::{
    Router,
    body::Body,
    http::{HeaderName, Method, Request, StatusCode, header},
    response::Response,
};
use serde::{Serialize, de::DeserializeOwned};
use tower::ServiceExt;

use crate::identity::{AccountRole, Identity, SESSION_HEADER};

/// Test scenario builder
pub struct Scenario {
    app: Router,
    request: Request<Body>,
}

impl Scenario {
    pub fn new(app: Router) -> Self {
        Self {
            app,
            request: Request::new(Body::empty()),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        *self.request.method_mut() = method;
        self
    }

    pub fn uri(mut self, uri: &str) -> Self {
        *self.request.uri_mut() = uri.parse().unwrap();
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.request.headers_mut().insert(
            HeaderName::from_bytes(key.as_bytes()).unwrap(),
            value.parse().unwrap(),
        );
        self
    }

    /// Attach an identity the way an upstream auth layer would
    pub fn identity(mut self, identity: Identity) -> Self {
        self.request.extensions_mut().insert(identity);
        self
    }

    pub fn as_farmer(self, account_id: &str) -> Self {
        self.identity(Identity::account(account_id, AccountRole::Farmer))
    }

    pub fn as_consumer(self, account_id: &str) -> Self {
        self.identity(Identity::account(account_id, AccountRole::Consumer))
    }

    pub fn as_admin(self, account_id: &str) -> Self {
        self.identity(Identity::account(account_id, AccountRole::Admin))
    }

    /// Send an anonymous voter session token
    pub fn with_session(self, token: &str) -> Self {
        self.header(SESSION_HEADER, token)
    }

    /// Set JSON body from a serializable type
    pub fn json_body<T: Serialize>(mut self, body: &T) -> Self {
        let json = serde_json::to_string(body).unwrap();
        *self.request.body_mut() = Body::from(json);
        self.request
            .headers_mut()
            .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        self
    }

    /// Set a raw body without touching the content type
    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        *self.request.body_mut() = Body::from(body.into());
        self
    }

    pub async fn execute(self) -> ScenarioAssert {
        let response = self.app.oneshot(self.request).await.unwrap();
        ScenarioAssert { response }
    }
}

/// Assertion builder for test responses
pub struct ScenarioAssert {
    response: Response,
}

impl ScenarioAssert {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn assert_status(self, expected: StatusCode) -> Self {
        assert_eq!(
            self.response.status(),
            expected,
            "Expected status {}, got {}",
            expected,
            self.response.status()
        );
        self
    }

    pub fn assert_ok(self) -> Self {
        self.assert_status(StatusCode::OK)
    }

    pub fn assert_created(self) -> Self {
        self.assert_status(StatusCode::CREATED)
    }

    pub fn assert_bad_request(self) -> Self {
        self.assert_status(StatusCode::BAD_REQUEST)
    }

    pub fn assert_unauthorized(self) -> Self {
        self.assert_status(StatusCode::UNAUTHORIZED)
    }

    pub fn assert_payment_required(self) -> Self {
        self.assert_status(StatusCode::PAYMENT_REQUIRED)
    }

    pub fn assert_forbidden(self) -> Self {
        self.assert_status(StatusCode::FORBIDDEN)
    }

    pub fn assert_not_found(self) -> Self {
        self.assert_status(StatusCode::NOT_FOUND)
    }

    pub fn assert_conflict(self) -> Self {
        self.assert_status(StatusCode::CONFLICT)
    }

    /// Value of a response header, if present and valid UTF-8
    pub fn header(&self, key: &str) -> Option<String> {
        self.response
            .headers()
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    pub fn assert_header(self, key: &str, expected: &str) -> Self {
        let value = self
            .header(key)
            .unwrap_or_else(|| panic!("Header '{}' not found", key));
        assert_eq!(value, expected, "Header '{}' value mismatch", key);
        self
    }

    pub fn assert_no_header(self, key: &str) -> Self {
        assert!(
            !self.response.headers().contains_key(key),
            "Unexpected header '{}'",
            key
        );
        self
    }

    pub async fn body_bytes(self) -> Vec<u8> {
        axum::body::to_bytes(self.response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    pub async fn json<T: DeserializeOwned>(self) -> T {
        let bytes = self.body_bytes().await;
        serde_json::from_slice(&bytes).expect("Failed to parse JSON response")
    }

    /// Assert a JSON field using dot notation (`"checks.0.name"`)
    pub async fn assert_json_field(self, path: &str, expected: serde_json::Value) -> Self {
        let (parts, body) = self.response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        let actual =
            json_path_get(&json, path).unwrap_or_else(|| panic!("Path '{}' not found in {}", path, json));
        assert_eq!(actual, &expected, "JSON path '{}' value mismatch", path);

        Self {
            response: Response::from_parts(parts, Body::from(bytes)),
        }
    }

    pub fn response(self) -> Response {
        self.response
    }
}

fn json_path_get<'a>(json: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = json;
    for part in path.split('.') {
        current = match part.parse::<usize>() {
            Ok(index) => current.get(index)?,
            Err(_) => current.get(part)?,
        };
    }
    Some(current)
}

pub fn get(app: Router, uri: &str) -> Scenario {
    Scenario::new(app).method(Method::GET).uri(uri)
}

pub fn post(app: Router, uri: &str) -> Scenario {
    Scenario::new(app).method(Method::POST).uri(uri)
}

pub fn put(app: Router, uri: &str) -> Scenario {
    Scenario::new(app).method(Method::PUT).uri(uri)
}

pub fn delete(app: Router, uri: &str) -> Scenario {
    Scenario::new(app).method(Method::DELETE).uri(uri)
}

pub fn patch(app: Router, uri: &str) -> Scenario {
    Scenario::new(app).method(Method::PATCH).uri(uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Extension, Json, routing::get as axum_get};
    use serde_json::json;

    async fn whoami(Extension(identity): Extension<Identity>) -> Json<serde_json::Value> {
        Json(json!({ "account_id": identity.account_id(), "role": identity.role() }))
    }

    #[tokio::test]
    async fn test_identity_extension_reaches_handler() {
        let app = Router::new().route("/whoami", axum_get(whoami));

        get(app, "/whoami")
            .as_farmer("7")
            .execute()
            .await
            .assert_ok()
            .assert_json_field("account_id", json!("7"))
            .await
            .assert_json_field("role", json!("farmer"))
            .await;
    }

    #[test]
    fn test_json_path_get() {
        let value = json!({ "checks": [{ "name": "sessions" }] });
        assert_eq!(json_path_get(&value, "checks.0.name"), Some(&json!("sessions")));
        assert_eq!(json_path_get(&value, "checks.1.name"), None);
    }
}
