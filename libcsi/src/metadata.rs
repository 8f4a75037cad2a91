//! Volume record stored inside each bucket.
//!
//! A bucket carries its own description as `metadata.json` at its root.
//! The record is written once when the volume is created and is the only
//! source of truth for the committed capacity and the mounter choice.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::gateway::ObjectStoreGateway;

/// Object key of the volume record.
pub const METADATA_KEY: &str = "metadata.json";

/// Prefix under which volume data lives inside the bucket.
pub const FS_PREFIX: &str = "csi-fs";

/// Key of the empty object reserving [`FS_PREFIX`].
pub const MARKER_KEY: &str = "csi-fs/";

pub const CONTENT_TYPE: &str = "application/json";

/// Descriptor of one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    /// Volume id, equal to the bucket name.
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "FSPath")]
    pub fs_path: String,
    #[serde(rename = "CapacityBytes")]
    pub capacity_bytes: i64,
    /// Mounter override; `None` means the process default.
    #[serde(
        rename = "Mounter",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub mounter: Option<String>,
}

impl VolumeRecord {
    /// A record for a freshly created volume.
    pub fn new(name: impl Into<String>, capacity_bytes: i64, mounter: Option<String>) -> Self {
        Self {
            name: name.into(),
            fs_path: FS_PREFIX.to_owned(),
            capacity_bytes,
            mounter: mounter.filter(|m| !m.is_empty()),
        }
    }
}

fn empty_as_none<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(d)?;
    Ok(value.filter(|m| !m.is_empty()))
}

pub fn encode(record: &VolumeRecord) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(record).map(Bytes::from)
}

pub fn decode(data: &[u8]) -> Result<VolumeRecord, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Read the record of `bucket`, `None` when the bucket has none.
pub async fn load<G: ObjectStoreGateway + ?Sized>(
    gateway: &G,
    bucket: &str,
) -> Result<Option<VolumeRecord>, StoreError> {
    if !gateway.object_exists(bucket, METADATA_KEY).await? {
        debug!(bucket, "no volume record");
        return Ok(None);
    }
    let data = gateway.get_object(bucket, METADATA_KEY).await?;
    decode(&data)
        .map(Some)
        .map_err(|e| StoreError::request("decode metadata", bucket, e))
}

/// Write `record` into the bucket it names.
pub async fn store<G: ObjectStoreGateway + ?Sized>(
    gateway: &G,
    record: &VolumeRecord,
) -> Result<(), StoreError> {
    let body = encode(record).map_err(|e| StoreError::request("encode metadata", &record.name, e))?;
    gateway
        .put_object(&record.name, METADATA_KEY, body, CONTENT_TYPE)
        .await
}

/// Write the empty object reserving the data prefix.
pub async fn write_marker<G: ObjectStoreGateway + ?Sized>(
    gateway: &G,
    bucket: &str,
) -> Result<(), StoreError> {
    gateway
        .put_object(bucket, MARKER_KEY, Bytes::new(), "")
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;

    #[test]
    fn wire_names() {
        let record = VolumeRecord::new("vol-a", 1 << 30, None);
        let json: serde_json::Value = serde_json::from_slice(&encode(&record).unwrap()).unwrap();
        assert_eq!(json["Name"], "vol-a");
        assert_eq!(json["FSPath"], "csi-fs");
        assert_eq!(json["CapacityBytes"], 1 << 30);
        assert!(json.get("Mounter").is_none());
    }

    #[test]
    fn decodes_records_without_mounter() {
        let record = decode(br#"{"Name":"vol-a","FSPath":"csi-fs","CapacityBytes":100}"#).unwrap();
        assert_eq!(record.capacity_bytes, 100);
        assert_eq!(record.mounter, None);

        let record =
            decode(br#"{"Name":"vol-a","FSPath":"csi-fs","CapacityBytes":100,"Mounter":""}"#)
                .unwrap();
        assert_eq!(record.mounter, None);

        let record =
            decode(br#"{"Name":"vol-a","FSPath":"csi-fs","CapacityBytes":1,"Mounter":"rclone"}"#)
                .unwrap();
        assert_eq!(record.mounter.as_deref(), Some("rclone"));
    }

    #[test]
    fn empty_mounter_hint_is_dropped() {
        let record = VolumeRecord::new("vol-a", 0, Some(String::new()));
        assert_eq!(record.mounter, None);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode(b"not json").is_err());
    }

    #[tokio::test]
    async fn load_and_store() {
        let gw = MemoryGateway::default();
        gw.create_bucket("vol-a").await.unwrap();
        assert_eq!(load(&gw, "vol-a").await.unwrap(), None);

        let record = VolumeRecord::new("vol-a", 42, Some("rclone".into()));
        store(&gw, &record).await.unwrap();
        write_marker(&gw, "vol-a").await.unwrap();

        assert_eq!(load(&gw, "vol-a").await.unwrap(), Some(record));
        assert_eq!(
            gw.content_type("vol-a", METADATA_KEY).as_deref(),
            Some(CONTENT_TYPE)
        );
        assert_eq!(gw.object_keys("vol-a"), [MARKER_KEY, METADATA_KEY]);
    }

    #[tokio::test]
    async fn load_from_missing_bucket_fails() {
        let gw = MemoryGateway::default();
        assert!(matches!(
            load(&gw, "nope").await,
            Err(StoreError::NoSuchBucket(_))
        ));
    }
}
