//! Core rate limiter implementation.

use http::header::{HeaderName, RETRY_AFTER};
use http::{HeaderMap, HeaderValue, Method};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, trace, warn};

use super::bucket::Bucket;
use super::clock::{Clock, SystemClock};
use super::key::{ClientKey, RequestInfo};
use super::rules::{FailurePolicy, Quota, RateLimitConfig};
use crate::error::Result;
use crate::store::{BucketStore, KeySpace, MemoryStore, RedisStore, StoreKind, StoreResult};

/// Number of lock stripes serializing checks for the same client.
const LOCK_STRIPES: usize = 64;

/// Quota capacity of the bucket that rejected the request.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Tokens left; always `0` on a rejection.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Epoch seconds at which the next token is expected.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The request was not evaluated: an `OPTIONS` request, or a store
    /// failure under [`FailurePolicy::Open`]
    Bypass,
    /// A token was consumed
    Allowed(Admission),
    /// The bucket is empty
    Limited(Rejection),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Limited(_))
    }
}

/// Details of an admitted request.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub key: ClientKey,
    pub limit: u32,
    /// Whole tokens left after this request
    pub remaining: u32,
}

/// Details of a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub limit: u32,
    /// Seconds the client should wait
    pub retry_after: u64,
    /// Epoch seconds at which a token is expected
    pub reset_at: u64,
}

impl Rejection {
    /// Headers to attach to the rejection response.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(4);
        headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after));
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u32));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset_at));
        headers
    }

    pub fn detail(&self) -> String {
        format!("Rate limit exceeded. Retry after {} seconds.", self.retry_after)
    }
}

/// Token bucket rate limiter.
///
/// This struct is thread-safe and can be shared across multiple tasks. Bucket
/// state is never cached here: every check reads the store, so several
/// instances pointed at one shared store see each other's consumption.
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
    keys: KeySpace,
    locks: Box<[Mutex<()>]>,
}

impl RateLimiter {
    /// Create a limiter with in-process buckets.
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Create a limiter for the configured backend.
    ///
    /// Connects to Redis when `redis_url` is set; an unreachable server is an
    /// error rather than a silent switch to in-process buckets.
    pub async fn connect(config: RateLimitConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn BucketStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisStore::connect(url, config.store_timeout()).await?),
            None => Arc::new(MemoryStore::new()),
        };
        Self::with_store(config, store)
    }

    /// Create a limiter over an existing store.
    pub fn with_store(config: RateLimitConfig, store: Arc<dyn BucketStore>) -> Result<Self> {
        config.validate()?;
        debug!(
            default_limit = config.default_limit,
            default_period = config.default_period,
            overrides = config.path_overrides.len(),
            store = ?store.kind(),
            "Rate limiter initialized"
        );

        Ok(Self {
            keys: KeySpace::new(config.key_prefix.clone()),
            config: Arc::new(config),
            store,
            clock: Arc::new(SystemClock),
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BucketStore> {
        &self.store
    }

    /// Decide whether a request may proceed.
    ///
    /// Store failures follow the configured [`FailurePolicy`]: `Open` lets the
    /// request through, `Closed` returns the error.
    pub async fn check(&self, request: &RequestInfo) -> Result<Decision> {
        if request.method == Method::OPTIONS {
            trace!(path = %request.path, "Skipping OPTIONS request");
            return Ok(Decision::Bypass);
        }

        let quota = self.config.resolve_quota(&request.path);
        let key = ClientKey::resolve(request, &self.config);

        trace!(
            key = %key,
            path = %request.path,
            limit = quota.limit,
            period = quota.period,
            "Checking rate limit"
        );

        match self.evaluate(&key, &request.path, quota).await {
            Ok(decision) => Ok(decision),
            Err(e) => match self.config.failure_policy {
                FailurePolicy::Open => {
                    warn!(key = %key, error = %e, "Bucket store failed, admitting request");
                    Ok(Decision::Bypass)
                }
                FailurePolicy::Closed => {
                    error!(key = %key, error = %e, "Bucket store failed, refusing request");
                    Err(e.into())
                }
            },
        }
    }

    async fn evaluate(&self, key: &ClientKey, path: &str, quota: Quota) -> StoreResult<Decision> {
        let _guard = self.lock_for(key).lock().await;

        let shared = self.store.kind() == StoreKind::Shared;
        let scope = self.config.per_path_buckets.then_some(path);
        if shared && scope.is_some() {
            self.evict_on_path_switch(key, path, quota).await?;
        }

        let bucket_key = self.keys.bucket(key, scope);
        let now = self.clock.now();
        let bucket = match self.store.get_bucket(&bucket_key).await? {
            Some(bucket) => bucket,
            None => {
                debug!(
                    key = %bucket_key,
                    limit = quota.limit,
                    period = quota.period,
                    "Creating new bucket"
                );
                Bucket::full(quota, now)
            }
        };

        let refill = bucket.refill(quota, now);
        if refill.tokens >= 1.0 {
            let remaining = refill.tokens - 1.0;
            self.store
                .set_bucket(
                    &bucket_key,
                    Bucket::new(remaining, now),
                    Some(quota.bucket_ttl()),
                )
                .await?;

            return Ok(Decision::Allowed(Admission {
                key: key.clone(),
                limit: quota.limit,
                remaining: remaining.floor() as u32,
            }));
        }

        // The bucket is left untouched so the refill clock keeps running.
        let until_full = quota.period as f64 - refill.elapsed;
        let mut retry_after = until_full.ceil().max(1.0) as u64;
        if shared {
            retry_after += 1;
        }
        let reset_at = (now + until_full).ceil() as u64;

        debug!(
            key = %bucket_key,
            tokens = refill.tokens,
            retry_after = retry_after,
            "Rate limit exceeded"
        );

        Ok(Decision::Limited(Rejection {
            limit: quota.limit,
            retry_after,
            reset_at,
        }))
    }

    /// Drop the client's bucket for the previous path when it moves to a new one.
    async fn evict_on_path_switch(&self, key: &ClientKey, path: &str, quota: Quota) -> StoreResult<()> {
        let last_path_key = self.keys.last_path(key);

        if let Some(previous) = self.store.get_last_path(&last_path_key).await? {
            if previous != path {
                let stale = self.keys.bucket(key, Some(&previous));
                self.store.delete_bucket(&stale).await?;
                debug!(key = %key, from = %previous, to = %path, "Evicted bucket after path switch");
            }
        }

        self.store
            .set_last_path(&last_path_key, path, Some(quota.bucket_ttl()))
            .await
    }

    fn lock_for(&self, key: &ClientKey) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.locks[(hasher.finish() as usize) % self.locks.len()]
    }
}
