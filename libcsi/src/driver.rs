//! Service composition.
//!
//! A [`Driver`] bundles the three CSI services.  It is assembled once before
//! serving starts and handed to the transport; there is no global state.

use std::fmt;
use std::sync::Arc;

use crate::backend::{VolumeController, VolumeNode};
use crate::config::DriverConfig;
use crate::controller::CsiController;
use crate::gateway::{GatewayConnector, S3Connector};
use crate::identity::{CsiIdentity, DriverIdentity};
use crate::mounter::{CommandRunner, SystemRunner};
use crate::node::CsiNode;

#[derive(Clone)]
pub struct Driver {
    pub identity: Arc<dyn CsiIdentity>,
    pub controller: Arc<dyn CsiController>,
    pub node: Arc<dyn CsiNode>,
}

impl Driver {
    pub fn new(
        identity: Arc<dyn CsiIdentity>,
        controller: Arc<dyn CsiController>,
        node: Arc<dyn CsiNode>,
    ) -> Self {
        Self {
            identity,
            controller,
            node,
        }
    }

    /// The production driver: real S3 endpoints and host processes.
    pub fn s3(config: &DriverConfig) -> Self {
        Self::with_parts(config, S3Connector, Arc::new(SystemRunner))
    }

    /// Wire the stock services over any connector and runner.
    pub fn with_parts<C>(config: &DriverConfig, connector: C, runner: Arc<dyn CommandRunner>) -> Self
    where
        C: GatewayConnector + Clone + 'static,
    {
        Self::new(
            Arc::new(DriverIdentity::new(&config.driver_name)),
            Arc::new(VolumeController::new(
                connector.clone(),
                &config.default_mounter,
            )),
            Arc::new(VolumeNode::new(connector, runner, config)),
        )
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryConnector;
    use crate::mounter::RecordingRunner;

    #[tokio::test]
    async fn driver_reports_configured_name() {
        let mut config = DriverConfig::new("node-7");
        config.driver_name = "s3.csi.example.com".into();
        let driver = Driver::with_parts(
            &config,
            MemoryConnector::default(),
            Arc::new(RecordingRunner::new()),
        );
        let info = driver.identity.get_plugin_info().await.unwrap();
        assert_eq!(info.name, "s3.csi.example.com");
        assert_eq!(driver.node.get_info().await.unwrap().node_id, "node-7");
    }

    #[test]
    fn production_driver_builds_without_io() {
        let driver = Driver::s3(&DriverConfig::new("node-1"));
        let _ = format!("{driver:?}");
    }
}
