//! Rate limit rules configuration and quota matching.
//!
//! A [`RateLimitConfig`] is built once at startup, validated, and then handed
//! to the limiter which never mutates it. Quotas are resolved per request path
//! by exact, case-sensitive match against the configured overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{QuotaGuardError, Result};

/// A request allowance: `limit` requests refilled evenly over `period` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Bucket capacity in requests
    pub limit: u32,
    /// Seconds to refill an empty bucket
    pub period: u64,
}

impl Quota {
    pub fn new(limit: u32, period: u64) -> Self {
        Self { limit, period }
    }

    /// Tokens granted per second.
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.limit) / self.period as f64
    }

    /// Expiry applied to bucket records in a shared store.
    pub fn bucket_ttl(&self) -> Duration {
        Duration::from_secs(self.period.saturating_mul(2))
    }

    fn validate(&self, what: &str) -> Result<()> {
        if self.limit == 0 {
            return Err(QuotaGuardError::Config(format!("{what}: limit must be positive")));
        }
        if self.period == 0 {
            return Err(QuotaGuardError::Config(format!("{what}: period must be positive")));
        }
        Ok(())
    }
}

/// What to do with a request when the bucket store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Let the request through unlimited
    #[default]
    Open,
    /// Refuse the request with a server error
    Closed,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per period when no override matches
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Period in seconds when no override matches
    #[serde(default = "default_period")]
    pub default_period: u64,

    /// Exact request path to quota
    #[serde(default)]
    pub path_overrides: HashMap<String, Quota>,

    /// Key authenticated requests by user instead of address
    #[serde(default = "default_true")]
    pub limit_per_user: bool,

    /// Redis connection URL; in-process buckets are used when absent
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Namespace prepended to every store key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Keep a separate bucket for each path a client visits
    #[serde(default = "default_true")]
    pub per_path_buckets: bool,

    /// Behavior when the store fails mid-check
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Timeout for each shared store call in milliseconds (0 disables)
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            default_period: default_period(),
            path_overrides: HashMap::new(),
            limit_per_user: true,
            redis_url: None,
            key_prefix: default_key_prefix(),
            per_path_buckets: true,
            failure_policy: FailurePolicy::default(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

fn default_limit() -> u32 {
    100
}

fn default_period() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_key_prefix() -> String {
    "rate_limiter".to_string()
}

fn default_store_timeout_ms() -> u64 {
    1000
}

impl RateLimitConfig {
    /// Create a configuration with the default quota.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration with a custom default quota.
    pub fn with_default_quota(limit: u32, period: u64) -> Self {
        Self {
            default_limit: limit,
            default_period: period,
            ..Self::default()
        }
    }

    /// Add an exact-path quota override.
    pub fn with_override(mut self, path: impl Into<String>, limit: u32, period: u64) -> Self {
        self.path_overrides.insert(path.into(), Quota::new(limit, period));
        self
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RateLimitConfig = serde_yaml::from_str(yaml).map_err(|e| {
            QuotaGuardError::Config(format!("Failed to parse rate limit config: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject quotas that could never admit a request.
    pub fn validate(&self) -> Result<()> {
        self.default_quota().validate("default quota")?;
        for (path, quota) in &self.path_overrides {
            quota.validate(&format!("override for {path}"))?;
        }
        if self.key_prefix.is_empty() {
            return Err(QuotaGuardError::Config("key_prefix must not be empty".to_string()));
        }
        Ok(())
    }

    /// The quota applied when no override matches.
    pub fn default_quota(&self) -> Quota {
        Quota::new(self.default_limit, self.default_period)
    }

    /// Find the quota for a request path.
    ///
    /// Only exact matches count: `/api/users` does not match `/api/users/1`
    /// or `/API/users`.
    pub fn resolve_quota(&self, path: &str) -> Quota {
        self.path_overrides
            .get(path)
            .copied()
            .unwrap_or_else(|| self.default_quota())
    }

    /// Per-call store timeout, if enabled.
    pub fn store_timeout(&self) -> Option<Duration> {
        (self.store_timeout_ms > 0).then(|| Duration::from_millis(self.store_timeout_ms))
    }
}
