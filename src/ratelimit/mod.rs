//! Rate limiting logic and state management.

mod bucket;
mod clock;
mod key;
mod limiter;
mod rules;

pub use bucket::{Bucket, Refill};
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{client_ip, ClientKey, Identity, RequestInfo, UNKNOWN_IP};
pub use limiter::{
    Admission, Decision, RateLimiter, Rejection, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
pub use rules::{FailurePolicy, Quota, RateLimitConfig};
