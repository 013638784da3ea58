//! Token bucket state and refill arithmetic.

use serde::{Deserialize, Serialize};

use super::rules::Quota;

/// Consumption state for one client (or one client on one path).
///
/// Stored records encode as the JSON pair `[tokens, last_refill]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct Bucket {
    /// Remaining allowance, never above the quota limit
    pub tokens: f64,
    /// Epoch seconds of the last recomputation
    pub last_refill: f64,
}

/// Result of bringing a bucket up to date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Refill {
    /// Seconds since the last refill, never negative
    pub elapsed: f64,
    /// Tokens available now, capped at the limit
    pub tokens: f64,
}

impl Bucket {
    pub fn new(tokens: f64, last_refill: f64) -> Self {
        Self { tokens, last_refill }
    }

    /// The state of a bucket never seen before.
    pub fn full(quota: Quota, now: f64) -> Self {
        Self::new(f64::from(quota.limit), now)
    }

    /// Compute the tokens available at `now` without consuming any.
    ///
    /// A clock that moved backwards counts as no time passing.
    pub fn refill(&self, quota: Quota, now: f64) -> Refill {
        let elapsed = (now - self.last_refill).max(0.0);
        let tokens = (self.tokens + elapsed * quota.refill_rate()).min(f64::from(quota.limit));
        Refill { elapsed, tokens }
    }
}

impl From<(f64, f64)> for Bucket {
    fn from((tokens, last_refill): (f64, f64)) -> Self {
        Self::new(tokens, last_refill)
    }
}

impl From<Bucket> for (f64, f64) {
    fn from(bucket: Bucket) -> Self {
        (bucket.tokens, bucket.last_refill)
    }
}
