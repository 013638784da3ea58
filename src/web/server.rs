//! HTTP server implementation.

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::with_rate_limit;
use crate::error::Result;
use crate::ratelimit::RateLimiter;

/// HTTP server with every route behind the rate limiter.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Application routes, already wrapped by the limiter
    router: Router,
}

impl HttpServer {
    /// Create a new server for `router`.
    pub fn new(addr: SocketAddr, router: Router, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            addr,
            router: with_rate_limit(router, rate_limiter),
        }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}
