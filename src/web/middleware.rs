//! Rate limiting middleware for axum routers.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::response::unavailable_response;
use crate::ratelimit::{Decision, Identity, RateLimiter, RequestInfo};

/// Install the limiter in front of every route of `router`.
///
/// Layers added to the router after this call run before the limiter, which
/// is where an authentication layer inserting [`Identity`] belongs.
pub fn with_rate_limit<S>(router: Router<S>, limiter: Arc<RateLimiter>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(limiter, rate_limit))
}

/// Middleware function admitting or rejecting a request.
///
/// Admitted requests reach the handler untouched. Rejected requests get a 429;
/// a store failure under the closed policy gets a 503.
#[instrument(
    skip_all,
    fields(method = %request.method(), path = %request.uri().path())
)]
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let info = request_info(&request);

    match limiter.check(&info).await {
        Ok(Decision::Limited(rejection)) => {
            debug!(retry_after = rejection.retry_after, "Request rate limited");
            rejection.into_response()
        }
        Ok(_) => next.run(request).await,
        Err(_) => unavailable_response(),
    }
}

/// Extract what the limiter needs from an HTTP request.
///
/// The peer address is taken from [`ConnectInfo`] when the server provides
/// it; the identity from an [`Identity`] request extension.
pub fn request_info<B>(request: &http::Request<B>) -> RequestInfo {
    RequestInfo {
        method: request.method().clone(),
        path: request.uri().path().to_string(),
        headers: request.headers().clone(),
        remote_addr: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip()),
        identity: request.extensions().get::<Identity>().cloned(),
    }
}
