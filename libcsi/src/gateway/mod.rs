//! Object store gateway.
//!
//! A thin set of bucket and object operations used by the controller and
//! node services.  Each RPC builds a fresh gateway through a
//! [`GatewayConnector`] from the credentials carried in its request.
//!
//! `create_bucket` is not idempotent: callers check [`bucket_exists`] first.
//!
//! [`bucket_exists`]: ObjectStoreGateway::bucket_exists

pub mod memory;
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::config::S3Config;
use crate::error::{DeleteFailure, StoreError};

pub use memory::{MemoryConnector, MemoryGateway};
pub use s3::{S3Connector, S3Gateway};

/// Upper bound of keys per `delete_objects` call (S3 DeleteObjects limit).
pub const DELETE_BATCH_SIZE: usize = 1000;

/// Keys buffered between the listing producer and the deleting consumer.
const LIST_CHANNEL_DEPTH: usize = 2 * DELETE_BATCH_SIZE;

/// One page of a bucket listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    /// Token for the next page, `None` on the last page.
    pub next: Option<String>,
}

/// Bucket and object operations over a remote object store.
#[async_trait]
pub trait ObjectStoreGateway: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

    /// Create a bucket.  Fails if the bucket already exists.
    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Delete an empty bucket.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError>;

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError>;

    /// List one page of object keys, recursively, starting at `token`.
    async fn list_objects_page(
        &self,
        bucket: &str,
        token: Option<String>,
    ) -> Result<ObjectPage, StoreError>;

    /// Delete a batch of objects.
    ///
    /// A request-level failure is an `Err`; objects the store refused to
    /// delete individually are returned as failures.
    async fn delete_objects(
        &self,
        bucket: &str,
        keys: Vec<String>,
    ) -> Result<Vec<DeleteFailure>, StoreError>;

    /// Delete every object in `bucket`, then the bucket itself.
    ///
    /// Listing streams keys to a consumer that deletes them in batches of
    /// [`DELETE_BATCH_SIZE`].  Listing errors travel through the same
    /// channel as the keys.  If listing fails or any object survives, the
    /// bucket is left in place and the whole failure is returned; nothing is
    /// retried.
    #[instrument(skip(self))]
    async fn remove_bucket_recursive(&self, bucket: &str) -> Result<(), StoreError> {
        let (tx, mut rx) = mpsc::channel::<Result<String, StoreError>>(LIST_CHANNEL_DEPTH);

        let producer = async move {
            let mut token = None;
            loop {
                let page = match self.list_objects_page(bucket, token).await {
                    Ok(page) => page,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
                for key in page.keys {
                    // The consumer hung up after a listing error.
                    if tx.send(Ok(key)).await.is_err() {
                        return;
                    }
                }
                match page.next {
                    Some(next) => token = Some(next),
                    None => return,
                }
            }
        };

        let consumer = async move {
            let mut sweep = Sweep::default();
            let mut batch = Vec::with_capacity(DELETE_BATCH_SIZE);
            while let Some(item) = rx.recv().await {
                match item {
                    Ok(key) => {
                        batch.push(key);
                        if batch.len() == DELETE_BATCH_SIZE {
                            sweep.flush(self, bucket, &mut batch).await;
                        }
                    }
                    Err(e) => {
                        sweep.list_error = Some(e);
                        break;
                    }
                }
            }
            // Dropping the receiver stops the producer if we broke out early.
            drop(rx);
            sweep.flush(self, bucket, &mut batch).await;
            sweep
        };

        let ((), sweep) = tokio::join!(producer, consumer);

        for failure in &sweep.failures {
            warn!(bucket, key = %failure.key, reason = %failure.reason, "failed to remove object");
        }
        if let Some(source) = sweep.list_error {
            warn!(bucket, removed = sweep.removed, "listing failed while emptying bucket");
            return Err(StoreError::Listing {
                bucket: bucket.to_owned(),
                source: Box::new(source),
                failures: sweep.failures,
            });
        }
        if !sweep.failures.is_empty() {
            return Err(StoreError::PartialDelete {
                bucket: bucket.to_owned(),
                failures: sweep.failures,
            });
        }

        debug!(bucket, removed = sweep.removed, "bucket emptied");
        self.delete_bucket(bucket).await?;
        info!(bucket, "bucket removed");
        Ok(())
    }
}

/// Running totals of a bucket emptying pass.
#[derive(Default)]
struct Sweep {
    removed: usize,
    failures: Vec<DeleteFailure>,
    list_error: Option<StoreError>,
}

impl Sweep {
    async fn flush<G: ObjectStoreGateway + ?Sized>(
        &mut self,
        gateway: &G,
        bucket: &str,
        batch: &mut Vec<String>,
    ) {
        if batch.is_empty() {
            return;
        }
        let keys = std::mem::take(batch);
        let attempted = keys.len();
        match gateway.delete_objects(bucket, keys.clone()).await {
            Ok(failures) => {
                self.removed += attempted - failures.len();
                self.failures.extend(failures);
            }
            Err(e) => {
                let reason = e.to_string();
                self.failures.extend(keys.into_iter().map(|key| DeleteFailure {
                    key,
                    reason: reason.clone(),
                }));
            }
        }
    }
}

/// Builds a gateway from per-call credentials.
pub trait GatewayConnector: Send + Sync {
    fn connect(&self, config: &S3Config) -> Result<Arc<dyn ObjectStoreGateway>, StoreError>;
}
