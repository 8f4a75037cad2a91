//! S3 gateway backed by `aws-sdk-s3`.
//!
//! Every gateway is built from the static credentials of one request and
//! addresses buckets path-style, which is what MinIO and most self-hosted
//! S3 implementations expect.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier,
};
use bytes::Bytes;
use tracing::debug;

use super::{GatewayConnector, ObjectPage, ObjectStoreGateway};
use crate::config::S3Config;
use crate::error::{DeleteFailure, StoreError};

/// Region used when the secrets do not name one.  Buckets in this region
/// are created without a location constraint.
pub const DEFAULT_REGION: &str = "us-east-1";

const CREDENTIALS_PROVIDER: &str = "csi-request-secrets";

fn sdk_error<E: std::error::Error>(op: &'static str, bucket: &str, e: E) -> StoreError {
    StoreError::request(op, bucket, DisplayErrorContext(e))
}

/// Gateway talking to an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Gateway {
    client: Client,
    region: String,
}

impl S3Gateway {
    pub fn new(config: &S3Config) -> Result<Self, StoreError> {
        config.validate()?;
        let region = if config.region.is_empty() {
            DEFAULT_REGION.to_owned()
        } else {
            config.region.clone()
        };
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            CREDENTIALS_PROVIDER,
        );
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true);
        if !config.endpoint.is_empty() {
            builder = builder.endpoint_url(&config.endpoint);
        }
        debug!(endpoint = %config.endpoint, %region, "S3 client configured");
        Ok(Self {
            client: Client::from_conf(builder.build()),
            region,
        })
    }
}

#[async_trait]
impl ObjectStoreGateway for S3Gateway {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(sdk_error("head_bucket", bucket, e)),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let mut req = self.client.create_bucket().bucket(bucket);
        if self.region != DEFAULT_REGION {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        match req.send().await {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error().is_some_and(|se| {
                    se.is_bucket_already_exists() || se.is_bucket_already_owned_by_you()
                }) =>
            {
                Err(StoreError::BucketAlreadyExists(bucket.to_owned()))
            }
            Err(e) => Err(sdk_error("create_bucket", bucket, e)),
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| sdk_error("delete_bucket", bucket, e))?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let mut req = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body));
        if !content_type.is_empty() {
            req = req.content_type(content_type);
        }
        req.send()
            .await
            .map_err(|e| sdk_error("put_object", bucket, e))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let out = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(out) => out,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Err(StoreError::ObjectNotFound {
                    bucket: bucket.to_owned(),
                    key: key.to_owned(),
                });
            }
            Err(e) => return Err(sdk_error("get_object", bucket, e)),
        };
        let data = out
            .body
            .collect()
            .await
            .map_err(|e| StoreError::request("get_object", bucket, e))?;
        Ok(data.into_bytes())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(sdk_error("head_object", bucket, e)),
        }
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        token: Option<String>,
    ) -> Result<ObjectPage, StoreError> {
        let out = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| sdk_error("list_objects_v2", bucket, e))?;

        let keys = out
            .contents()
            .iter()
            .filter_map(|o| o.key().map(str::to_owned))
            .collect();
        let next = if out.is_truncated().unwrap_or(false) {
            out.next_continuation_token().map(str::to_owned)
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
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::request("delete_objects", bucket, e))?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| StoreError::request("delete_objects", bucket, e))?;

        let out = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| sdk_error("delete_objects", bucket, e))?;

        Ok(out
            .errors()
            .iter()
            .map(|e| DeleteFailure {
                key: e.key().unwrap_or_default().to_owned(),
                reason: format!(
                    "{}: {}",
                    e.code().unwrap_or("Unknown"),
                    e.message().unwrap_or_default()
                ),
            })
            .collect())
    }
}

/// Builds an [`S3Gateway`] per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Connector;

impl GatewayConnector for S3Connector {
    fn connect(&self, config: &S3Config) -> Result<Arc<dyn ObjectStoreGateway>, StoreError> {
        Ok(Arc::new(S3Gateway::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_region_uses_default() {
        let gw = S3Gateway::new(&S3Config {
            endpoint: "http://127.0.0.1:9000".into(),
            access_key_id: "minio".into(),
            secret_access_key: "minio123".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(gw.region, DEFAULT_REGION);
    }

    #[tokio::test]
    async fn bad_endpoint_is_client_error() {
        let err = S3Connector
            .connect(&S3Config {
                endpoint: "minio:9000 with spaces".into(),
                ..Default::default()
            })
            .err()
            .expect("connect must fail");
        assert!(matches!(err, StoreError::Client(_)));
    }
}
