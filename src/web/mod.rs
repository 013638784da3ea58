//! Web integration: axum middleware and server.

mod middleware;
mod response;
mod server;

pub use middleware::{rate_limit, request_info, with_rate_limit};
pub use response::unavailable_response;
pub use server::HttpServer;
