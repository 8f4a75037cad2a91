//! In-process object store.
//!
//! [`MemoryGateway`] keeps buckets in memory and shares its state across
//! clones, so every gateway handed out by a [`MemoryConnector`] sees the same
//! store.  It also counts calls and can inject failures, which the service
//! tests rely on.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use super::{GatewayConnector, ObjectPage, ObjectStoreGateway};
use crate::config::S3Config;
use crate::error::{DeleteFailure, StoreError};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    content_type: String,
}

type Bucket = BTreeMap<String, StoredObject>;

#[derive(Debug)]
struct Inner {
    buckets: DashMap<String, Bucket>,
    page_size: usize,
    fail_delete: Mutex<HashSet<String>>,
    /// Number of listing pages served before listing starts failing.
    list_budget: AtomicUsize,
    buckets_created: AtomicUsize,
    delete_batches: AtomicUsize,
}

/// Shared in-memory object store.
#[derive(Debug, Clone)]
pub struct MemoryGateway {
    inner: Arc<Inner>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }
}

impl MemoryGateway {
    /// A store that returns at most `page_size` keys per listing page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                buckets: DashMap::new(),
                page_size: page_size.max(1),
                fail_delete: Mutex::new(HashSet::new()),
                list_budget: AtomicUsize::new(usize::MAX),
                buckets_created: AtomicUsize::new(0),
                delete_batches: AtomicUsize::new(0),
            }),
        }
    }

    /// Make deletion of `key` fail in every bucket.
    pub fn fail_delete_of(&self, key: &str) {
        self.inner.fail_delete.lock().insert(key.to_owned());
    }

    /// Serve `pages` listing pages, then fail every listing request.
    pub fn fail_listing_after(&self, pages: usize) {
        self.inner.list_budget.store(pages, Ordering::SeqCst);
    }

    /// Number of successful `create_bucket` calls.
    pub fn buckets_created(&self) -> usize {
        self.inner.buckets_created.load(Ordering::SeqCst)
    }

    /// Number of `delete_objects` calls.
    pub fn delete_batches(&self) -> usize {
        self.inner.delete_batches.load(Ordering::SeqCst)
    }

    /// Sorted keys currently stored in `bucket`.
    pub fn object_keys(&self, bucket: &str) -> Vec<String> {
        self.inner
            .buckets
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Content type recorded for an object.
    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.inner
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key).map(|o| o.content_type.clone()))
    }

    fn no_such_bucket(bucket: &str) -> StoreError {
        StoreError::NoSuchBucket(bucket.to_owned())
    }
}

#[async_trait]
impl ObjectStoreGateway for MemoryGateway {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        Ok(self.inner.buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        match self.inner.buckets.entry(bucket.to_owned()) {
            Entry::Occupied(_) => Err(StoreError::BucketAlreadyExists(bucket.to_owned())),
            Entry::Vacant(slot) => {
                slot.insert(Bucket::new());
                self.inner.buckets_created.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let removed = self
            .inner
            .buckets
            .remove_if(bucket, |_, objects| objects.is_empty());
        if removed.is_some() {
            return Ok(());
        }
        if self.inner.buckets.contains_key(bucket) {
            Err(StoreError::request("delete_bucket", bucket, "BucketNotEmpty"))
        } else {
            Err(Self::no_such_bucket(bucket))
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let mut objects = self
            .inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        objects.insert(
            key.to_owned(),
            StoredObject {
                body,
                content_type: content_type.to_owned(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let objects = self
            .inner
            .buckets
            .get(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        objects
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| StoreError::ObjectNotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            })
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        let objects = self
            .inner
            .buckets
            .get(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        Ok(objects.contains_key(key))
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        token: Option<String>,
    ) -> Result<ObjectPage, StoreError> {
        let budget = self.inner.list_budget.load(Ordering::SeqCst);
        if budget == 0 {
            return Err(StoreError::request("list_objects", bucket, "InternalError"));
        }
        if budget != usize::MAX {
            self.inner.list_budget.fetch_sub(1, Ordering::SeqCst);
        }

        let objects = self
            .inner
            .buckets
            .get(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;

        // The token is the last key of the previous page.
        let mut keys: Vec<String> = match &token {
            Some(after) => objects
                .range::<String, _>((
                    std::ops::Bound::Excluded(after),
                    std::ops::Bound::Unbounded,
                ))
                .map(|(k, _)| k.clone())
                .take(self.inner.page_size + 1)
                .collect(),
            None => objects
                .keys()
                .take(self.inner.page_size + 1)
                .cloned()
                .collect(),
        };
        let next = if keys.len() > self.inner.page_size {
            keys.truncate(self.inner.page_size);
            keys.last().cloned()
        } else {
            None
        };
        Ok(ObjectPage { keys, next })
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: Vec<String>,
    ) -> Result<Vec<DeleteFailure>, StoreError> {
        self.inner.delete_batches.fetch_add(1, Ordering::SeqCst);
        let fail_delete = self.inner.fail_delete.lock().clone();
        let mut objects = self
            .inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;

        let mut failures = Vec::new();
        for key in keys {
            if fail_delete.contains(&key) {
                failures.push(DeleteFailure {
                    key,
                    reason: "AccessDenied".to_owned(),
                });
                continue;
            }
            objects.remove(&key);
        }
        Ok(failures)
    }
}

/// Hands out handles to one shared [`MemoryGateway`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    gateway: MemoryGateway,
    connects: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new(gateway: MemoryGateway) -> Self {
        Self {
            gateway,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn gateway(&self) -> &MemoryGateway {
        &self.gateway
    }

    /// Number of gateways built so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl GatewayConnector for MemoryConnector {
    fn connect(&self, config: &S3Config) -> Result<Arc<dyn ObjectStoreGateway>, StoreError> {
        config.validate()?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.gateway.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_is_not_idempotent() {
        let gw = MemoryGateway::default();
        gw.create_bucket("b1").await.unwrap();
        let err = gw.create_bucket("b1").await.unwrap_err();
        assert!(matches!(err, StoreError::BucketAlreadyExists(_)));
        assert_eq!(gw.buckets_created(), 1);
    }

    #[tokio::test]
    async fn pages_cover_all_keys_once() {
        let gw = MemoryGateway::with_page_size(3);
        gw.create_bucket("b1").await.unwrap();
        for key in ["a", "b", "c", "d", "e", "f", "g"] {
            gw.put_object("b1", key, Bytes::new(), "").await.unwrap();
        }

        let mut seen = Vec::new();
        let mut token = None;
        loop {
            let page = gw.list_objects_page("b1", token).await.unwrap();
            seen.extend(page.keys);
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, ["a", "b", "c", "d", "e", "f", "g"]);
    }

    #[tokio::test]
    async fn non_empty_bucket_cannot_be_deleted() {
        let gw = MemoryGateway::default();
        gw.create_bucket("b1").await.unwrap();
        gw.put_object("b1", "k", Bytes::from_static(b"v"), "text/plain")
            .await
            .unwrap();
        assert!(gw.delete_bucket("b1").await.is_err());
        assert!(gw.bucket_exists("b1").await.unwrap());
    }

    #[tokio::test]
    async fn get_missing_object() {
        let gw = MemoryGateway::default();
        gw.create_bucket("b1").await.unwrap();
        let err = gw.get_object("b1", "metadata.json").await.unwrap_err();
        assert!(matches!(err, StoreError::ObjectNotFound { .. }));
        assert!(!gw.object_exists("b1", "metadata.json").await.unwrap());
    }

    #[test]
    fn connector_shares_state_and_validates() {
        let connector = MemoryConnector::default();
        let cfg = S3Config::default();
        connector.connect(&cfg).unwrap();
        connector.connect(&cfg).unwrap();
        assert_eq!(connector.connects(), 2);

        let bad = S3Config {
            endpoint: "::not-a-url".into(),
            ..Default::default()
        };
        assert!(connector.connect(&bad).is_err());
    }
}
