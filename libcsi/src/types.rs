//! Core CSI types: volumes, capabilities, requests, and plugin info.
//!
//! These types form the data model shared by the CSI traits, the transport
//! layer, and the S3 backend.  They are all [`Serialize`]/[`Deserialize`] so
//! they can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.  For the S3 backend this is also
/// the name of the bucket backing the volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl VolumeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// Per-call credentials supplied by the orchestrator.
///
/// The `Debug` implementation only prints the keys, so requests can be
/// logged without leaking credentials.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secrets(pub HashMap<String, String>);

impl Secrets {
    /// Look up a secret, treating an empty value as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.0.keys().collect();
        keys.sort();
        f.debug_map()
            .entries(keys.into_iter().map(|k| (k, "<redacted>")))
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Secrets {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    SingleNodeWriter,
    SingleNodeReaderOnly,
    MultiNodeReaderOnly,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Additional mount flags (e.g. `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
    /// Filesystem type reported by the orchestrator; informational only.
    #[serde(default)]
    pub fs_type: String,
}

impl VolumeCapability {
    /// A capability with the given access mode and no mount flags.
    pub fn with_mode(access_mode: AccessMode) -> Self {
        Self {
            access_mode,
            mount_flags: Vec::new(),
            fs_type: String::new(),
        }
    }
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self::with_mode(AccessMode::SingleNodeWriter)
    }
}

/// Requested capacity bounds in bytes.  Only `required_bytes` is honoured.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityRange {
    pub required_bytes: i64,
    #[serde(default)]
    pub limit_bytes: i64,
}

// ---------------------------------------------------------------------------
// Volume
// ---------------------------------------------------------------------------

/// A provisioned volume as returned to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume identifier (bucket name).
    pub volume_id: VolumeId,
    /// Committed capacity in bytes.
    pub capacity_bytes: i64,
    /// Opaque context passed from Controller to Node operations.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

/// Outcome of `ValidateVolumeCapabilities`.
///
/// An unsupported capability is not an error: `confirmed` is `None` and
/// `message` explains why.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub confirmed: Option<Vec<VolumeCapability>>,
    #[serde(default)]
    pub message: String,
}

impl ValidationResult {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed.is_some()
    }
}

// ---------------------------------------------------------------------------
// Controller requests
// ---------------------------------------------------------------------------

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Orchestrator-chosen name, sanitized into the bucket name.
    pub name: String,
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    /// Required capabilities; must not be empty.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Storage class parameters, e.g. `mounter`.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub secrets: Secrets,
}

impl CreateVolumeRequest {
    /// Lower bound of the requested capacity, `0` when unspecified.
    pub fn required_bytes(&self) -> i64 {
        self.capacity_range.map(|r| r.required_bytes).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteVolumeRequest {
    pub volume_id: VolumeId,
    #[serde(default)]
    pub secrets: Secrets,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateVolumeCapabilitiesRequest {
    pub volume_id: VolumeId,
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    #[serde(default)]
    pub secrets: Secrets,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerExpandVolumeRequest {
    pub volume_id: VolumeId,
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    #[serde(default)]
    pub secrets: Secrets,
}

// ---------------------------------------------------------------------------
// Node requests
// ---------------------------------------------------------------------------

/// Request to stage a volume on a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    pub volume_id: VolumeId,
    /// Node-local staging mount point shared by all publishes of the volume.
    pub staging_target_path: String,
    pub volume_capability: Option<VolumeCapability>,
    /// Opaque context carried from `CreateVolume`.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    #[serde(default)]
    pub secrets: Secrets,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeUnstageVolumeRequest {
    pub volume_id: VolumeId,
    pub staging_target_path: String,
}

/// Request to publish a volume at a workload-specific target path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    pub volume_id: VolumeId,
    pub staging_target_path: String,
    /// Final mount point, e.g. `/var/lib/kubelet/pods/<uid>/volumes/<name>`.
    pub target_path: String,
    pub volume_capability: Option<VolumeCapability>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    #[serde(default)]
    pub secrets: Secrets,
}

impl NodePublishVolumeRequest {
    /// Mount flags carried by the requested capability.
    pub fn mount_flags(&self) -> &[String] {
        self.volume_capability
            .as_ref()
            .map(|c| c.mount_flags.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeUnpublishVolumeRequest {
    pub volume_id: VolumeId,
    pub target_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeExpandVolumeRequest {
    pub volume_id: VolumeId,
    pub volume_path: String,
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"rk8s.s3.csi"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
}

/// Optional RPCs supported by the Node service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    StageUnstageVolume,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: String,
    /// Maximum number of volumes the node can host; `0` means unlimited.
    pub max_volumes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display() {
        let id = VolumeId("vol-abc".into());
        assert_eq!(id.to_string(), "vol-abc");
    }

    #[test]
    fn secrets_debug_is_redacted() {
        let secrets: Secrets = [("accessKeyID", "AKIA"), ("secretAccessKey", "hunter2")]
            .into_iter()
            .collect();
        let rendered = format!("{secrets:?}");
        assert!(rendered.contains("accessKeyID"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("AKIA"));
    }

    #[test]
    fn secrets_empty_value_is_absent() {
        let secrets: Secrets = [("bucketName", "")].into_iter().collect();
        assert_eq!(secrets.get("bucketName"), None);
    }

    #[test]
    fn required_bytes_defaults_to_zero() {
        let req = CreateVolumeRequest::default();
        assert_eq!(req.required_bytes(), 0);

        let req = CreateVolumeRequest {
            capacity_range: Some(CapacityRange {
                required_bytes: 100,
                limit_bytes: 500,
            }),
            ..Default::default()
        };
        assert_eq!(req.required_bytes(), 100);
    }

    #[test]
    fn secrets_are_a_plain_map_on_the_wire() {
        let req = DeleteVolumeRequest {
            volume_id: "v1".into(),
            secrets: [("region", "eu-west-1")].into_iter().collect(),
        };
        let json = serde_json::to_value(&req).expect("serialize");
        assert_eq!(json["secrets"]["region"], "eu-west-1");
    }

    #[test]
    fn volume_capability_default() {
        let cap = VolumeCapability::default();
        assert_eq!(cap.access_mode, AccessMode::SingleNodeWriter);
        assert!(cap.mount_flags.is_empty());
    }
}
