//! CSI Controller service trait.
//!
//! The Controller service manages the centralized volume lifecycle: creation,
//! deletion and capability validation.  A volume is either absent or present;
//! there is no in-place resize, so the get/expand RPCs are unimplemented by
//! default.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    ControllerExpandVolumeRequest, CreateVolumeRequest, DeleteVolumeRequest,
    ValidateVolumeCapabilitiesRequest, ValidationResult, Volume, VolumeId,
};

/// Controller service: centralized volume management.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a volume, or return the existing one if it can satisfy the
    /// request.
    ///
    /// The returned [`Volume`] carries the committed capacity and the
    /// `volume_context` forwarded to subsequent Node operations.
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a volume.  Deleting an absent volume succeeds.
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError>;

    /// Check whether the requested capabilities are supported.
    ///
    /// Unsupported capabilities are reported through
    /// [`ValidationResult::message`], not as an error.
    async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidationResult, CsiError>;

    async fn controller_get_volume(&self, _volume_id: &VolumeId) -> Result<Volume, CsiError> {
        Err(CsiError::Unimplemented("ControllerGetVolume".into()))
    }

    /// Returns the new capacity in bytes.
    async fn controller_expand_volume(
        &self,
        _req: ControllerExpandVolumeRequest,
    ) -> Result<i64, CsiError> {
        Err(CsiError::Unimplemented("ControllerExpandVolume".into()))
    }
}
