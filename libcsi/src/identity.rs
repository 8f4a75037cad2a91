//! CSI Identity service.
//!
//! The Identity service allows callers to discover plugin metadata and check
//! plugin health.  Every CSI plugin must implement this service.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{PluginCapability, PluginInfo};

/// Identity service: plugin discovery and health probing.
#[async_trait]
pub trait CsiIdentity: Send + Sync {
    /// Return the plugin name and version.
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError>;

    /// Liveness probe.  Returns `true` when the plugin is healthy.
    async fn probe(&self) -> Result<bool, CsiError>;

    /// Advertise the capabilities supported by this plugin.
    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError>;
}

/// Identity of the S3 driver.
///
/// The driver keeps no connection to probe: every RPC dials the store with
/// its own credentials, so a running process is a healthy one.
#[derive(Debug, Clone)]
pub struct DriverIdentity {
    name: String,
}

impl DriverIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl CsiIdentity for DriverIdentity {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: self.name.clone(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![PluginCapability::ControllerService])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plugin_info() {
        let identity = DriverIdentity::new("rk8s.s3.csi");
        let info = identity.get_plugin_info().await.unwrap();
        assert_eq!(info.name, "rk8s.s3.csi");
        assert_eq!(info.vendor_version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn probe_and_capabilities() {
        let identity = DriverIdentity::new("rk8s.s3.csi");
        assert!(identity.probe().await.unwrap());
        assert_eq!(
            identity.get_plugin_capabilities().await.unwrap(),
            [PluginCapability::ControllerService]
        );
    }
}
