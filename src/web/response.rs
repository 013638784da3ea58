//! Responses produced by the limiter instead of the downstream handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::ratelimit::Rejection;

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = json!({
            "status": false,
            "message": "Too Many Requests",
            "detail": self.detail(),
        });

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        response.headers_mut().extend(self.headers());
        response
    }
}

/// Response for a request refused because the bucket store is down.
pub fn unavailable_response() -> Response {
    let body = json!({
        "status": false,
        "message": "Service Unavailable",
        "detail": "Rate limiter backend unavailable.",
    });
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}
