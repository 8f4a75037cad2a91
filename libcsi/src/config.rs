//! Driver configuration.
//!
//! Two layers:
//! - [`DriverConfig`] is built once at process start (from CLI flags) and
//!   injected into the services.
//! - [`S3Config`] is rebuilt from the request secrets on every RPC; no
//!   credential state survives past a single call.

use std::fmt;
use std::path::PathBuf;

use url::Url;

use crate::error::StoreError;
use crate::types::Secrets;

pub const SECRET_ACCESS_KEY_ID: &str = "accessKeyID";
pub const SECRET_SECRET_ACCESS_KEY: &str = "secretAccessKey";
pub const SECRET_BUCKET_NAME: &str = "bucketName";
pub const SECRET_REGION: &str = "region";
pub const SECRET_ENDPOINT: &str = "endpoint";

/// Volume parameter selecting the mounter backend.
pub const PARAM_MOUNTER: &str = "mounter";

pub const DEFAULT_DRIVER_NAME: &str = "rk8s.s3.csi";

/// Object store connection settings derived from a single request.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Pre-provisioned bucket to use instead of one bucket per volume.
    pub bucket_name: Option<String>,
    /// Process default mounter, consulted when a volume has no override.
    pub mounter: String,
}

impl S3Config {
    pub fn from_secrets(secrets: &Secrets, default_mounter: &str) -> Self {
        let get = |key| secrets.get(key).unwrap_or_default().to_owned();
        Self {
            endpoint: get(SECRET_ENDPOINT),
            region: get(SECRET_REGION),
            access_key_id: get(SECRET_ACCESS_KEY_ID),
            secret_access_key: get(SECRET_SECRET_ACCESS_KEY),
            bucket_name: secrets.get(SECRET_BUCKET_NAME).map(str::to_owned),
            mounter: default_mounter.to_owned(),
        }
    }

    /// Check that the endpoint, when given, is an http(s) URL.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.endpoint.is_empty() {
            return Ok(());
        }
        let url = Url::parse(&self.endpoint)
            .map_err(|e| StoreError::Client(format!("invalid endpoint {}: {e}", self.endpoint)))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(StoreError::Client(format!(
                "unsupported endpoint scheme {other:?} in {}",
                self.endpoint
            ))),
        }
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("bucket_name", &self.bucket_name)
            .field("mounter", &self.mounter)
            .finish()
    }
}

/// Process-wide settings shared by the Identity, Controller and Node services.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Name reported by `GetPluginInfo`.
    pub driver_name: String,
    pub node_id: String,
    /// Mounter used when a volume does not pick one.
    pub default_mounter: String,
    /// Where backends write credential files before mounting.
    pub credentials_dir: PathBuf,
    /// Reported by `NodeGetInfo`; `0` means unlimited.
    pub max_volumes_per_node: u64,
}

impl DriverConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            driver_name: DEFAULT_DRIVER_NAME.to_owned(),
            node_id: node_id.into(),
            default_mounter: String::new(),
            credentials_dir: default_credentials_dir(),
            max_volumes_per_node: 0,
        }
    }
}

/// The invoking user's home directory, where s3fs looks for its password
/// file.
pub fn default_credentials_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> Secrets {
        [
            (SECRET_ACCESS_KEY_ID, "AKIAEXAMPLE"),
            (SECRET_SECRET_ACCESS_KEY, "s3cr3t"),
            (SECRET_REGION, "eu-central-1"),
            (SECRET_ENDPOINT, "https://s3.example.com:9000"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn config_from_secrets() {
        let cfg = S3Config::from_secrets(&secrets(), "rclone");
        assert_eq!(cfg.access_key_id, "AKIAEXAMPLE");
        assert_eq!(cfg.region, "eu-central-1");
        assert_eq!(cfg.bucket_name, None);
        assert_eq!(cfg.mounter, "rclone");
        cfg.validate().unwrap();
    }

    #[test]
    fn debug_redacts_secret_key() {
        let cfg = S3Config::from_secrets(&secrets(), "");
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("s3cr3t"));
    }

    #[test]
    fn rejects_malformed_endpoint() {
        let mut cfg = S3Config::from_secrets(&secrets(), "");
        cfg.endpoint = "not a url".into();
        assert!(matches!(cfg.validate(), Err(StoreError::Client(_))));

        cfg.endpoint = "ftp://s3.example.com".into();
        assert!(matches!(cfg.validate(), Err(StoreError::Client(_))));
    }

    #[test]
    fn driver_config_defaults() {
        let cfg = DriverConfig::new("node-01");
        assert_eq!(cfg.driver_name, DEFAULT_DRIVER_NAME);
        assert!(cfg.default_mounter.is_empty());
    }
}
