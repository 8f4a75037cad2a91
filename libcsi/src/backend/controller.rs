//! Volume lifecycle on top of an object store.
//!
//! One volume is one bucket.  The bucket holds a reserved `csi-fs/` marker
//! and a `metadata.json` record carrying the committed capacity and the
//! mounter choice.
//!
//! The exists-then-create sequence in [`VolumeController::create_volume`]
//! is not synchronized: two concurrent creates of the same name race, and
//! which record wins is undefined.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::config::{PARAM_MOUNTER, S3Config};
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::gateway::{GatewayConnector, ObjectStoreGateway};
use crate::metadata::{self, VolumeRecord};
use crate::sanitize::sanitize_volume_id;
use crate::types::*;

/// Message returned when a capability other than single-node-writer is
/// requested.
pub const UNSUPPORTED_ACCESS_MODE: &str = "only single node writer is supported";

/// Controller service backed by per-request object store gateways.
pub struct VolumeController<C> {
    connector: C,
    default_mounter: String,
}

impl<C: GatewayConnector> VolumeController<C> {
    pub fn new(connector: C, default_mounter: impl Into<String>) -> Self {
        Self {
            connector,
            default_mounter: default_mounter.into(),
        }
    }

    fn connect(&self, secrets: &Secrets) -> Result<(Arc<dyn ObjectStoreGateway>, S3Config), CsiError> {
        let config = S3Config::from_secrets(secrets, &self.default_mounter);
        let gateway = self.connector.connect(&config)?;
        Ok((gateway, config))
    }
}

#[async_trait]
impl<C: GatewayConnector> CsiController for VolumeController<C> {
    #[instrument(skip(self, req), fields(name = %req.name, capacity = req.required_bytes()))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        let sanitized = sanitize_volume_id(&req.name);
        if sanitized.is_empty() {
            return Err(CsiError::missing("name"));
        }
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::missing("volume capabilities"));
        }

        let (gateway, config) = self.connect(&req.secrets)?;
        // A pre-provisioned bucket replaces the per-volume one.
        let volume_id = config.bucket_name.clone().unwrap_or(sanitized);
        let requested = req.required_bytes();
        let mounter = req.parameters.get(PARAM_MOUNTER).cloned();

        let committed = if gateway.bucket_exists(&volume_id).await? {
            let record = match metadata::load(gateway.as_ref(), &volume_id).await? {
                Some(record) => record,
                None => {
                    let record = VolumeRecord::new(&volume_id, requested, mounter);
                    metadata::store(gateway.as_ref(), &record).await?;
                    info!(%volume_id, "adopted existing bucket without volume record");
                    record
                }
            };
            if requested > record.capacity_bytes {
                warn!(
                    %volume_id,
                    requested,
                    committed = record.capacity_bytes,
                    "volume exists with smaller capacity",
                );
                return Err(CsiError::VolumeAlreadyExists(format!(
                    "{volume_id} (committed {} bytes, requested {requested})",
                    record.capacity_bytes
                )));
            }
            debug!(%volume_id, committed = record.capacity_bytes, "volume already exists, reusing");
            record.capacity_bytes
        } else {
            gateway.create_bucket(&volume_id).await?;
            metadata::write_marker(gateway.as_ref(), &volume_id).await?;
            let record = VolumeRecord::new(&volume_id, requested, mounter);
            metadata::store(gateway.as_ref(), &record).await?;
            info!(%volume_id, capacity = requested, "volume created");
            requested
        };

        Ok(Volume {
            volume_id: VolumeId(volume_id),
            capacity_bytes: committed,
            volume_context: req.parameters,
        })
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::missing("volume id"));
        }
        let (gateway, _) = self.connect(&req.secrets)?;
        let bucket = req.volume_id.as_str();

        if !gateway.bucket_exists(bucket).await? {
            debug!("bucket does not exist, nothing to delete");
            return Ok(());
        }
        gateway.remove_bucket_recursive(bucket).await?;
        info!("volume deleted");
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidationResult, CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::missing("volume id"));
        }
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::missing("volume capabilities"));
        }

        let (gateway, _) = self.connect(&req.secrets)?;
        if !gateway.bucket_exists(req.volume_id.as_str()).await? {
            return Err(CsiError::VolumeNotFound(req.volume_id.to_string()));
        }

        if req
            .volume_capabilities
            .iter()
            .any(|cap| cap.access_mode != AccessMode::SingleNodeWriter)
        {
            debug!("unsupported access mode requested");
            return Ok(ValidationResult {
                confirmed: None,
                message: UNSUPPORTED_ACCESS_MODE.to_owned(),
            });
        }

        Ok(ValidationResult {
            confirmed: Some(vec![VolumeCapability::with_mode(
                AccessMode::SingleNodeWriter,
            )]),
            message: String::new(),
        })
    }
}
