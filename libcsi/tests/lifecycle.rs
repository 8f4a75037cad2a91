//! End-to-end volume lifecycle through the request dispatcher, backed by the
//! in-memory object store and a recording process runner.

use std::sync::Arc;

use libcsi::config::{SECRET_ACCESS_KEY_ID, SECRET_SECRET_ACCESS_KEY};
use libcsi::gateway::{MemoryConnector, MemoryGateway, ObjectStoreGateway};
use libcsi::metadata::{MARKER_KEY, METADATA_KEY};
use libcsi::mounter::RecordingRunner;
use libcsi::transport::dispatch;
use libcsi::*;

struct Harness {
    driver: Driver,
    gateway: MemoryGateway,
    runner: Arc<RecordingRunner>,
    tmp: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let connector = MemoryConnector::default();
        let gateway = connector.gateway().clone();
        let runner = Arc::new(RecordingRunner::new());

        let mut config = DriverConfig::new("node-1");
        config.credentials_dir = tmp.path().join("home");
        let driver = Driver::with_parts(&config, connector, runner.clone());

        Self {
            driver,
            gateway,
            runner,
            tmp,
        }
    }

    async fn call(&self, request: CsiMessage) -> CsiMessage {
        dispatch(&self.driver, request).await
    }
}

fn secrets() -> Secrets {
    [
        (SECRET_ACCESS_KEY_ID, "AKIAEXAMPLE"),
        (SECRET_SECRET_ACCESS_KEY, "s3cr3t"),
    ]
    .into_iter()
    .collect()
}

#[tokio::test]
async fn create_stage_publish_teardown() {
    let h = Harness::new();

    let volume = match h
        .call(CsiMessage::CreateVolume(CreateVolumeRequest {
            name: "PVC-Lifecycle".into(),
            capacity_range: Some(CapacityRange {
                required_bytes: 1 << 30,
                limit_bytes: 0,
            }),
            volume_capabilities: vec![VolumeCapability::default()],
            secrets: secrets(),
            ..Default::default()
        }))
        .await
    {
        CsiMessage::VolumeCreated(volume) => volume,
        other => panic!("unexpected response: {other}"),
    };
    assert_eq!(volume.volume_id.as_str(), "pvc-lifecycle");
    assert_eq!(volume.capacity_bytes, 1 << 30);
    assert_eq!(
        h.gateway.object_keys("pvc-lifecycle"),
        [MARKER_KEY, METADATA_KEY]
    );

    match h
        .call(CsiMessage::ValidateVolumeCapabilities(
            ValidateVolumeCapabilitiesRequest {
                volume_id: volume.volume_id.clone(),
                volume_capabilities: vec![VolumeCapability::default()],
                secrets: secrets(),
            },
        ))
        .await
    {
        CsiMessage::Validation(result) => assert!(result.is_confirmed()),
        other => panic!("unexpected response: {other}"),
    }

    let staging = h.tmp.path().join("staging");
    let target = h.tmp.path().join("target");

    let staged = h
        .call(CsiMessage::StageVolume(NodeStageVolumeRequest {
            volume_id: volume.volume_id.clone(),
            staging_target_path: staging.display().to_string(),
            volume_capability: Some(VolumeCapability::default()),
            secrets: secrets(),
            ..Default::default()
        }))
        .await;
    assert!(matches!(staged, CsiMessage::Ok), "{staged}");
    assert!(staging.is_dir());

    let published = h
        .call(CsiMessage::PublishVolume(NodePublishVolumeRequest {
            volume_id: volume.volume_id.clone(),
            staging_target_path: staging.display().to_string(),
            target_path: target.display().to_string(),
            volume_capability: Some(VolumeCapability::default()),
            secrets: secrets(),
            ..Default::default()
        }))
        .await;
    assert!(matches!(published, CsiMessage::Ok), "{published}");
    assert!(target.is_dir());
    assert!(h.tmp.path().join("home/.passwd-s3fs").is_file());

    let unpublished = h
        .call(CsiMessage::UnpublishVolume(NodeUnpublishVolumeRequest {
            volume_id: volume.volume_id.clone(),
            target_path: target.display().to_string(),
        }))
        .await;
    assert!(matches!(unpublished, CsiMessage::Ok), "{unpublished}");
    assert_eq!(h.runner.programs(), ["s3fs", "umount"]);

    let unstaged = h
        .call(CsiMessage::UnstageVolume(NodeUnstageVolumeRequest {
            volume_id: volume.volume_id.clone(),
            staging_target_path: staging.display().to_string(),
        }))
        .await;
    assert!(matches!(unstaged, CsiMessage::Ok), "{unstaged}");

    let deleted = h
        .call(CsiMessage::DeleteVolume(DeleteVolumeRequest {
            volume_id: volume.volume_id.clone(),
            secrets: secrets(),
        }))
        .await;
    assert!(matches!(deleted, CsiMessage::Ok), "{deleted}");
    assert!(!h.gateway.bucket_exists("pvc-lifecycle").await.unwrap());

    // Deleting again is still a success.
    let again = h
        .call(CsiMessage::DeleteVolume(DeleteVolumeRequest {
            volume_id: volume.volume_id,
            secrets: secrets(),
        }))
        .await;
    assert!(matches!(again, CsiMessage::Ok), "{again}");
}

#[tokio::test]
async fn publish_of_unknown_volume_is_not_found() {
    let h = Harness::new();
    let response = h
        .call(CsiMessage::PublishVolume(NodePublishVolumeRequest {
            volume_id: "ghost".into(),
            staging_target_path: h.tmp.path().join("s").display().to_string(),
            target_path: h.tmp.path().join("t").display().to_string(),
            volume_capability: Some(VolumeCapability::default()),
            secrets: secrets(),
            ..Default::default()
        }))
        .await;
    match response {
        CsiMessage::Error(e) => assert_eq!(e.code(), Code::NotFound),
        other => panic!("unexpected response: {other}"),
    }
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn recreating_with_larger_capacity_conflicts() {
    let h = Harness::new();
    let request = |bytes| {
        CsiMessage::CreateVolume(CreateVolumeRequest {
            name: "vol-grow".into(),
            capacity_range: Some(CapacityRange {
                required_bytes: bytes,
                limit_bytes: 0,
            }),
            volume_capabilities: vec![VolumeCapability::default()],
            secrets: secrets(),
            ..Default::default()
        })
    };

    assert!(matches!(
        h.call(request(1024)).await,
        CsiMessage::VolumeCreated(_)
    ));
    match h.call(request(4096)).await {
        CsiMessage::Error(e) => assert_eq!(e.code(), Code::AlreadyExists),
        other => panic!("unexpected response: {other}"),
    }
    match h.call(request(512)).await {
        CsiMessage::VolumeCreated(v) => assert_eq!(v.capacity_bytes, 1024),
        other => panic!("unexpected response: {other}"),
    }
    assert_eq!(h.gateway.buckets_created(), 1);
}
