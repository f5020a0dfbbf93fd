use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

/// Assigns an `x-request-id` to requests that arrive without one.
#[derive(Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let request_id = Uuid::new_v4().to_string().parse().ok()?;
        Some(RequestId::new(request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_distinct_ids() {
        let request = axum::http::Request::new(());
        let mut make = MakeRequestUuid;

        let first = make.make_request_id(&request).unwrap();
        let second = make.make_request_id(&request).unwrap();
        assert_ne!(first.header_value(), second.header_value());
        assert_eq!(first.header_value().len(), 36);
    }
}
