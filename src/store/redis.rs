//! Redis-backed bucket store shared between limiter instances.
//!
//! Each read and write is a separate round trip. Two instances checking the
//! same client at the same moment can both read the same bucket and both
//! admit, so short bursts may exceed the quota under heavy concurrent load on
//! one key. No script or transaction is used to close that window.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use super::{BucketStore, StoreError, StoreKind, StoreResult};
use crate::ratelimit::Bucket;

/// Bucket store living in Redis.
///
/// Bucket records are JSON pairs written with `SET .. EX`; last-path records
/// are plain strings. Last paths written by this instance are also cached
/// locally to skip a read on the next request. The cache is not
/// authoritative: another instance may have moved the client on since.
pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Option<Duration>,
    last_paths: LastPathCache,
}

impl RedisStore {
    /// Connect to Redis, failing if the server cannot be reached.
    pub async fn connect(url: &str, timeout: Option<Duration>) -> StoreResult<Self> {
        info!(url = %sanitize_url(url), "Connecting to Redis bucket store");

        let client = Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let connect = ConnectionManager::new(client);
        let conn = match timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| StoreError::Timeout(limit))?,
            None => connect.await,
        }
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!("Redis bucket store connected");
        Ok(Self {
            conn,
            timeout,
            last_paths: LastPathCache::new(),
        })
    }

    /// Round-trip a `PING`.
    pub async fn health_check(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = self.run(redis::cmd("PING").query_async(&mut conn)).await?;
        debug!("Redis health check passed");
        Ok(())
    }

    async fn run<T>(&self, op: impl Future<Output = RedisResult<T>>) -> StoreResult<T> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, op)
                .await
                .map_err(|_| StoreError::Timeout(limit))?
                .map_err(StoreError::from),
            None => op.await.map_err(StoreError::from),
        }
    }
}

#[async_trait]
impl BucketStore for RedisStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Shared
    }

    async fn get_bucket(&self, key: &str) -> StoreResult<Option<Bucket>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = self.run(conn.get(key)).await?;
        trace!(key = %key, found = raw.is_some(), "Fetched bucket");
        raw.map(|raw| decode_bucket(&raw)).transpose()
    }

    async fn set_bucket(&self, key: &str, bucket: Bucket, ttl: Option<Duration>) -> StoreResult<()> {
        let value = serde_json::to_string(&bucket)?;
        let mut conn = self.conn.clone();
        match ttl.map(ttl_secs) {
            Some(secs) => self.run(conn.set_ex::<_, _, ()>(key, value, secs)).await,
            None => self.run(conn.set::<_, _, ()>(key, value)).await,
        }
    }

    async fn delete_bucket(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        self.run(conn.del::<_, ()>(key)).await
    }

    async fn get_last_path(&self, key: &str) -> StoreResult<Option<String>> {
        if let Some(path) = self.last_paths.get(key, Instant::now()) {
            return Ok(Some(path));
        }

        let mut conn = self.conn.clone();
        self.run(conn.get(key)).await
    }

    async fn set_last_path(&self, key: &str, path: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        match ttl.map(ttl_secs) {
            Some(secs) => self.run(conn.set_ex::<_, _, ()>(key, path, secs)).await?,
            None => self.run(conn.set::<_, _, ()>(key, path)).await?,
        }
        if let Some(ttl) = ttl {
            self.last_paths.insert(key, path, ttl, Instant::now());
        }
        Ok(())
    }
}

/// How often expired cache entries are swept out on write.
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Last paths this instance wrote, kept no longer than their Redis records.
///
/// Entries are dropped when read after expiry, and a periodic sweep on write
/// removes those of clients that never come back.
struct LastPathCache {
    entries: DashMap<String, CachedPath>,
    next_sweep: Mutex<Instant>,
}

struct CachedPath {
    path: String,
    expires_at: Instant,
}

impl LastPathCache {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_sweep: Mutex::new(Instant::now() + CACHE_SWEEP_INTERVAL),
        }
    }

    fn get(&self, key: &str, now: Instant) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.path.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        None
    }

    fn insert(&self, key: &str, path: &str, ttl: Duration, now: Instant) {
        self.entries.insert(
            key.to_string(),
            CachedPath {
                path: path.to_string(),
                expires_at: now + ttl,
            },
        );
        self.sweep(now);
    }

    fn sweep(&self, now: Instant) {
        {
            let mut next = self.next_sweep.lock();
            if now < *next {
                return;
            }
            *next = now + CACHE_SWEEP_INTERVAL;
        }

        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        trace!(removed = before - self.entries.len(), "Swept last path cache");
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn decode_bucket(raw: &str) -> StoreResult<Bucket> {
    Ok(serde_json::from_str(raw)?)
}

/// Redis rejects `EX 0`.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Hide the password of a Redis URL for logging.
fn sanitize_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid_url".to_string(),
    }
}
