//! Node-side mount orchestration.
//!
//! Publishing resolves the volume record from the bucket, picks a mounter
//! and runs it against the target path.  Unpublishing is a forced, lazy
//! `umount`.  Stage and unstage only validate and delegate to the mounter
//! hooks, which are no-ops for the FUSE backends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::config::{DriverConfig, S3Config};
use crate::error::{CsiError, StoreError};
use crate::gateway::GatewayConnector;
use crate::metadata::{self, VolumeRecord};
use crate::mounter::{CommandRunner, CommandSpec, MountOptions, MounterFactory};
use crate::node::CsiNode;
use crate::types::*;

/// Mount table consulted for publish idempotency.
pub const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Mode of staging and target directories; workloads run as arbitrary uids.
const MOUNT_DIR_MODE: u32 = 0o777;

/// `umount` output meaning the target was already detached.
const NOT_MOUNTED: [&str; 2] = ["not mounted", "no mount point specified"];

/// Node service mounting buckets through external FUSE tools.
pub struct VolumeNode<C> {
    connector: C,
    mounters: MounterFactory,
    runner: Arc<dyn CommandRunner>,
    node_id: String,
    max_volumes: u64,
    default_mounter: String,
    mount_table: PathBuf,
}

impl<C: GatewayConnector> VolumeNode<C> {
    pub fn new(connector: C, runner: Arc<dyn CommandRunner>, config: &DriverConfig) -> Self {
        Self {
            connector,
            mounters: MounterFactory::new(runner.clone(), config.credentials_dir.clone()),
            runner,
            node_id: config.node_id.clone(),
            max_volumes: config.max_volumes_per_node,
            default_mounter: config.default_mounter.clone(),
            mount_table: PathBuf::from(PROC_MOUNTS),
        }
    }

    /// Read mount points from `path` instead of [`PROC_MOUNTS`].
    pub fn with_mount_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_table = path.into();
        self
    }

    pub fn mounters(&self) -> &MounterFactory {
        &self.mounters
    }

    /// Fetch the volume record with the credentials of this request.
    async fn resolve(
        &self,
        volume_id: &VolumeId,
        secrets: &Secrets,
    ) -> Result<(VolumeRecord, S3Config), CsiError> {
        let config = S3Config::from_secrets(secrets, &self.default_mounter);
        let gateway = self.connector.connect(&config)?;
        match metadata::load(gateway.as_ref(), volume_id.as_str()).await {
            Ok(Some(record)) => Ok((record, config)),
            Ok(None) | Err(StoreError::NoSuchBucket(_)) => {
                Err(CsiError::VolumeNotFound(volume_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The mount table entry for `path`, if it is a mount point.
    async fn mount_at(&self, path: &str) -> Option<MountEntry> {
        match tokio::fs::read_to_string(&self.mount_table).await {
            Ok(contents) => find_mount(&contents, path),
            Err(e) => {
                warn!(table = %self.mount_table.display(), error = %e, "cannot read mount table");
                None
            }
        }
    }
}

/// One line of a mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MountEntry {
    source: String,
    fstype: String,
}

/// The last entry of a `/proc/mounts`-style table mounted at `path`.
fn find_mount(contents: &str, path: &str) -> Option<MountEntry> {
    let path = path.trim_end_matches('/');
    // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let mountpoint = fields.next()?;
            let fstype = fields.next().unwrap_or_default();
            (unescape_mount_path(mountpoint) == path).then(|| MountEntry {
                source: unescape_mount_path(source),
                fstype: fstype.to_owned(),
            })
        })
        .last()
}

/// Decode the octal escapes (`\040` for space) used in mount tables.
fn unescape_mount_path(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let code = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(code) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

async fn ensure_dir(path: &str) -> Result<(), CsiError> {
    tokio::fs::DirBuilder::new()
        .recursive(true)
        .mode(MOUNT_DIR_MODE)
        .create(path)
        .await
        .map_err(|e| CsiError::MountFailed {
            path: path.to_owned(),
            reason: format!("create directory: {e}"),
        })
}

#[async_trait]
impl<C: GatewayConnector> CsiNode for VolumeNode<C> {
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::missing("volume id"));
        }
        if req.staging_target_path.is_empty() {
            return Err(CsiError::missing("staging target path"));
        }
        if req.volume_capability.is_none() {
            return Err(CsiError::missing("volume capability"));
        }

        ensure_dir(&req.staging_target_path).await?;
        let (record, config) = self.resolve(&req.volume_id, &req.secrets).await?;
        self.mounters
            .build(&record, &config, MountOptions::default())
            .stage(Path::new(&req.staging_target_path))
            .await?;

        info!(path = %req.staging_target_path, "volume staged");
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn unstage_volume(&self, req: NodeUnstageVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::missing("volume id"));
        }
        if req.staging_target_path.is_empty() {
            return Err(CsiError::missing("staging target path"));
        }
        // Unstage requests carry no secrets, so the record cannot be read
        // here; the FUSE backends keep nothing on the staging path.
        debug!(path = %req.staging_target_path, "volume unstaged");
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, target = %req.target_path))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::missing("volume id"));
        }
        if req.staging_target_path.is_empty() {
            return Err(CsiError::missing("staging target path"));
        }
        if req.target_path.is_empty() {
            return Err(CsiError::missing("target path"));
        }
        if req.volume_capability.is_none() {
            return Err(CsiError::missing("volume capability"));
        }

        // Any entry counts, a stale FUSE mount included.
        if let Some(found) = self.mount_at(&req.target_path).await {
            info!(
                source = %found.source,
                fstype = %found.fstype,
                "target already mounted, skipping mount"
            );
            return Ok(());
        }

        ensure_dir(&req.target_path).await?;
        ensure_dir(&req.staging_target_path).await?;

        let (record, config) = self.resolve(&req.volume_id, &req.secrets).await?;
        let options = MountOptions {
            read_only: req.read_only,
            flags: req.mount_flags().to_vec(),
        };
        self.mounters
            .build(&record, &config, options)
            .mount(
                Path::new(&req.staging_target_path),
                Path::new(&req.target_path),
            )
            .await?;

        info!(read_only = req.read_only, "volume published");
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, target = %req.target_path))]
    async fn unpublish_volume(&self, req: NodeUnpublishVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::missing("volume id"));
        }
        if req.target_path.is_empty() {
            return Err(CsiError::missing("target path"));
        }

        let cmd = CommandSpec::new("umount").args(["--lazy", "--force", req.target_path.as_str()]);
        let output = self
            .runner
            .run(&cmd)
            .await
            .map_err(|e| CsiError::UnmountFailed {
                path: req.target_path.clone(),
                reason: format!("failed to start umount: {e}"),
            })?;

        if !output.is_success() {
            let detail = output.combined();
            if NOT_MOUNTED.iter().any(|m| detail.contains(m)) {
                warn!(output = %detail, "target was not mounted");
                return Ok(());
            }
            return Err(CsiError::UnmountFailed {
                path: req.target_path,
                reason: detail,
            });
        }

        info!("volume unpublished");
        Ok(())
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(vec![NodeCapability::StageUnstageVolume])
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.node_id.clone(),
            max_volumes: self.max_volumes,
        })
    }
}
