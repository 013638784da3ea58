//! Bucket storage backends.
//!
//! The limiter reads and writes bucket state through [`BucketStore`] so the
//! same admission logic runs against an in-process map or a shared Redis
//! instance.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::ratelimit::{Bucket, ClientKey};

/// Errors raised by a bucket store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("malformed bucket record: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Whether a store's state is visible to other limiter instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// State lives in this process only
    Local,
    /// State is shared through an external service
    Shared,
}

/// Storage for bucket and last-path records.
///
/// Calls are independent; no store offers a transaction spanning a read and
/// the following write.
#[async_trait]
pub trait BucketStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    async fn get_bucket(&self, key: &str) -> StoreResult<Option<Bucket>>;

    /// Write a bucket. Stores without expiry support ignore `ttl`.
    async fn set_bucket(&self, key: &str, bucket: Bucket, ttl: Option<Duration>) -> StoreResult<()>;

    /// Remove a bucket. Removing a missing bucket is not an error.
    async fn delete_bucket(&self, key: &str) -> StoreResult<()>;

    /// The last path a client requested. Only tracked by shared stores.
    async fn get_last_path(&self, _key: &str) -> StoreResult<Option<String>> {
        Ok(None)
    }

    async fn set_last_path(&self, _key: &str, _path: &str, _ttl: Option<Duration>) -> StoreResult<()> {
        Ok(())
    }
}

/// Builds namespaced store keys.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Format: `{prefix}:bucket:{client}` or `{prefix}:bucket:{client}|{path}`
    pub fn bucket(&self, client: &ClientKey, path: Option<&str>) -> String {
        match path {
            Some(path) => format!("{}:bucket:{}|{}", self.prefix, client, path),
            None => format!("{}:bucket:{}", self.prefix, client),
        }
    }

    /// Format: `{prefix}:last_path:{client}`
    pub fn last_path(&self, client: &ClientKey) -> String {
        format!("{}:last_path:{}", self.prefix, client)
    }
}
