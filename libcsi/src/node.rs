//! CSI Node service trait.
//!
//! The Node service runs on each worker node and makes a bucket available to
//! Pod containers:
//!
//! 1. **Stage**: prepare the node-wide staging path.
//! 2. **Publish**: mount the bucket at the Pod's target path.
//! 3. **Unpublish**: detach the target path.
//! 4. **Unstage**: release the staging path.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    NodeCapability, NodeExpandVolumeRequest, NodeInfo, NodePublishVolumeRequest,
    NodeStageVolumeRequest, NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest,
};

/// Node service: local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError>;

    async fn unstage_volume(&self, req: NodeUnstageVolumeRequest) -> Result<(), CsiError>;

    /// Publish a volume at `target_path`.
    ///
    /// This is idempotent: calling it again for a target that is already
    /// mounted succeeds without mounting twice.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Detach `target_path`.  A target that is not mounted is not an error.
    async fn unpublish_volume(&self, req: NodeUnpublishVolumeRequest) -> Result<(), CsiError>;

    /// Optional Node RPCs this plugin supports.
    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;

    /// Returns the new capacity in bytes.
    async fn expand_volume(&self, _req: NodeExpandVolumeRequest) -> Result<i64, CsiError> {
        Err(CsiError::Unimplemented("NodeExpandVolume".into()))
    }
}
