//! Wire envelope for the plugin RPCs.
//!
//! Every request and every reply is one [`CsiMessage`], serialized as JSON
//! on its own QUIC bi-directional stream.

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// One RPC request or its reply.
///
/// A caller writes a request variant and finishes its half of the stream;
/// the plugin answers with the matching reply variant or
/// [`CsiMessage::Error`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    /// Create a new volume (Controller).
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume (Controller).
    DeleteVolume(DeleteVolumeRequest),
    /// Validate volume capabilities (Controller).
    ValidateVolumeCapabilities(ValidateVolumeCapabilitiesRequest),
    /// Look up a volume (Controller, unimplemented).
    ControllerGetVolume(VolumeId),
    /// Grow a volume (Controller, unimplemented).
    ControllerExpandVolume(ControllerExpandVolumeRequest),

    /// Prepare the staging path of a volume (Node).
    StageVolume(NodeStageVolumeRequest),
    /// Release the staging path (Node).
    UnstageVolume(NodeUnstageVolumeRequest),
    /// Mount a volume at a Pod's target path (Node).
    PublishVolume(NodePublishVolumeRequest),
    /// Detach a Pod's target path (Node).
    UnpublishVolume(NodeUnpublishVolumeRequest),
    /// Grow a mounted volume (Node, unimplemented).
    NodeExpandVolume(NodeExpandVolumeRequest),
    /// Query optional Node RPCs (Node).
    GetNodeCapabilities,
    /// Query node info (Node).
    GetNodeInfo,

    /// Health probe (Identity).
    Probe,
    /// Query plugin info (Identity).
    GetPluginInfo,
    /// Query plugin capabilities (Identity).
    GetPluginCapabilities,

    // ----- Responses -------------------------------------------------------
    /// A volume was created or an existing one satisfies the request.
    VolumeCreated(Volume),
    /// A single volume.
    VolumeInfo(Volume),
    /// New capacity in bytes after an expansion.
    Expanded(i64),
    /// Outcome of a capability validation.
    Validation(ValidationResult),
    /// Optional Node RPCs.
    NodeCapabilities(Vec<NodeCapability>),
    /// Node information.
    NodeInfoResponse(NodeInfo),
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    /// Probe result.
    ProbeResult(bool),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// An error occurred.
    Error(CsiError),
}

// Secrets never appear here: requests print their volume only.
impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(req) => write!(f, "DeleteVolume({})", req.volume_id),
            Self::ValidateVolumeCapabilities(req) => {
                write!(f, "ValidateVolumeCapabilities({})", req.volume_id)
            }
            Self::ControllerGetVolume(id) => write!(f, "ControllerGetVolume({id})"),
            Self::ControllerExpandVolume(req) => {
                write!(f, "ControllerExpandVolume({})", req.volume_id)
            }
            Self::StageVolume(req) => write!(f, "StageVolume({})", req.volume_id),
            Self::UnstageVolume(req) => write!(f, "UnstageVolume({})", req.volume_id),
            Self::PublishVolume(req) => write!(f, "PublishVolume({})", req.volume_id),
            Self::UnpublishVolume(req) => write!(f, "UnpublishVolume({})", req.volume_id),
            Self::NodeExpandVolume(req) => write!(f, "NodeExpandVolume({})", req.volume_id),
            Self::GetNodeCapabilities => f.write_str("GetNodeCapabilities"),
            Self::GetNodeInfo => f.write_str("GetNodeInfo"),
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::VolumeInfo(v) => write!(f, "VolumeInfo({})", v.volume_id),
            Self::Expanded(bytes) => write!(f, "Expanded({bytes})"),
            Self::Validation(v) => write!(f, "Validation(confirmed={})", v.is_confirmed()),
            Self::NodeCapabilities(caps) => write!(f, "NodeCapabilities(count={})", caps.len()),
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::PluginInfoResponse(info) => write!(f, "PluginInfo(name={})", info.name),
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::ProbeResult(ok) => write!(f, "ProbeResult({ok})"),
            Self::Ok => f.write_str("Ok"),
            Self::Error(e) => write!(f, "Error({e})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serde_roundtrip() {
        let msg = CsiMessage::CreateVolume(CreateVolumeRequest {
            name: "test".into(),
            capacity_range: Some(CapacityRange {
                required_bytes: 1024,
                limit_bytes: 0,
            }),
            volume_capabilities: vec![VolumeCapability::default()],
            ..Default::default()
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        match de {
            CsiMessage::CreateVolume(req) => assert_eq!(req.required_bytes(), 1024),
            other => panic!("unexpected message: {other}"),
        }
    }

    #[test]
    fn unit_requests_are_bare_strings() {
        assert_eq!(serde_json::to_string(&CsiMessage::Probe).unwrap(), r#""Probe""#);
        let de: CsiMessage = serde_json::from_str(r#"{"Error":{"VolumeNotFound":"vol-1"}}"#)
            .expect("deserialize");
        assert!(matches!(de, CsiMessage::Error(CsiError::VolumeNotFound(_))));
    }

    #[test]
    fn display_hides_secrets() {
        let msg = CsiMessage::PublishVolume(NodePublishVolumeRequest {
            volume_id: "vol-a".into(),
            secrets: [("secretAccessKey", "hunter2")].into_iter().collect(),
            ..Default::default()
        });
        assert_eq!(msg.to_string(), "PublishVolume(vol-a)");
        assert_eq!(CsiMessage::Ok.to_string(), "Ok");
    }
}
