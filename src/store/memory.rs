//! In-process bucket store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use super::{BucketStore, StoreKind, StoreResult};
use crate::ratelimit::Bucket;

/// Buckets held in a mutex-guarded map.
///
/// State lasts until the process exits or a bucket is deleted; ttls are
/// ignored. Nothing is shared with other processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.buckets.lock().len()
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Local
    }

    async fn get_bucket(&self, key: &str) -> StoreResult<Option<Bucket>> {
        Ok(self.buckets.lock().get(key).copied())
    }

    async fn set_bucket(&self, key: &str, bucket: Bucket, _ttl: Option<Duration>) -> StoreResult<()> {
        self.buckets.lock().insert(key.to_string(), bucket);
        Ok(())
    }

    async fn delete_bucket(&self, key: &str) -> StoreResult<()> {
        self.buckets.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_bucket() {
        let store = MemoryStore::new();
        assert_eq!(store.get_bucket("missing").await.unwrap(), None);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        let bucket = Bucket::new(3.5, 100.0);

        store.set_bucket("k", bucket, None).await.unwrap();
        assert_eq!(store.get_bucket("k").await.unwrap(), Some(bucket));

        let updated = Bucket::new(2.5, 101.0);
        store.set_bucket("k", updated, Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(store.get_bucket("k").await.unwrap(), Some(updated));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_ttl_is_ignored() {
        let store = MemoryStore::new();
        store
            .set_bucket("k", Bucket::new(1.0, 0.0), Some(Duration::from_millis(1)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get_bucket("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.set_bucket("k", Bucket::new(1.0, 0.0), None).await.unwrap();

        store.delete_bucket("k").await.unwrap();
        store.delete_bucket("k").await.unwrap();
        assert_eq!(store.get_bucket("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_path_not_tracked() {
        let store = MemoryStore::new();
        store.set_last_path("client", "/a", None).await.unwrap();
        assert_eq!(store.get_last_path("client").await.unwrap(), None);
        assert_eq!(store.kind(), StoreKind::Local);
    }
}
