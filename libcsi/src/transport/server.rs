//! QUIC server that dispatches incoming CSI requests to a [`Driver`].

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::driver::Driver;
use crate::error::CsiError;
use crate::message::CsiMessage;

/// Largest request accepted on one stream.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// A CSI server that accepts QUIC connections and dispatches
/// [`CsiMessage`] requests to the services of a [`Driver`].
pub struct CsiServer {
    endpoint: quinn::Endpoint,
    driver: Driver,
}

impl CsiServer {
    /// Create a new server bound to `addr`.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        driver: Driver,
    ) -> Result<Self, CsiError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(CsiError::transport)?;
        info!(%addr, "CSI QUIC server listening");
        Ok(Self { endpoint, driver })
    }

    /// Accept connections in a loop until the endpoint is closed.
    ///
    /// Each accepted connection spawns a Tokio task, and each bi-stream
    /// within a connection is handled concurrently.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let driver = self.driver.clone();
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "CSI connection accepted");
                        if let Err(e) = handle_connection(conn, driver).await {
                            warn!(%remote, error = %e, "CSI connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "CSI incoming connection failed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Return a reference to the underlying QUIC endpoint, useful for
    /// obtaining the local address or shutting down.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

/// Handle all bi-streams on a single connection.
async fn handle_connection(conn: quinn::Connection, driver: Driver) -> Result<(), CsiError> {
    loop {
        let (send, recv) = match conn.accept_bi().await {
            Ok(stream) => stream,
            Err(quinn::ConnectionError::ApplicationClosed(_)) => return Ok(()),
            Err(e) => return Err(CsiError::transport(e)),
        };

        let driver = driver.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_stream(send, recv, &driver).await {
                error!(error = %e, "CSI stream handler error");
            }
        });
    }
}

/// Process a single bi-stream: read request → dispatch → write response.
#[instrument(skip_all)]
async fn handle_stream(
    mut send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    driver: &Driver,
) -> Result<(), CsiError> {
    let buf = recv
        .read_to_end(MAX_MESSAGE_SIZE)
        .await
        .map_err(CsiError::transport)?;

    // A malformed request still gets an answer.
    let response = match serde_json::from_slice::<CsiMessage>(&buf) {
        Ok(request) => {
            debug!(%request, "CSI request received");
            dispatch(driver, request).await
        }
        Err(e) => CsiMessage::Error(CsiError::InvalidArgument(format!("malformed request: {e}"))),
    };
    debug!(%response, "CSI response");

    let payload = serde_json::to_vec(&response).map_err(CsiError::internal)?;
    send.write_all(&payload)
        .await
        .map_err(CsiError::transport)?;
    send.finish().map_err(CsiError::transport)?;
    Ok(())
}

fn reply<T>(result: Result<T, CsiError>, ok: impl FnOnce(T) -> CsiMessage) -> CsiMessage {
    match result {
        Ok(value) => ok(value),
        Err(e) => CsiMessage::Error(e),
    }
}

/// Map a [`CsiMessage`] request to the correct service call and wrap the
/// result in a response [`CsiMessage`].
pub async fn dispatch(driver: &Driver, request: CsiMessage) -> CsiMessage {
    let Driver {
        identity,
        controller,
        node,
    } = driver;
    match request {
        // --- Identity ---------------------------------------------------
        CsiMessage::Probe => reply(identity.probe().await, CsiMessage::ProbeResult),
        CsiMessage::GetPluginInfo => reply(
            identity.get_plugin_info().await,
            CsiMessage::PluginInfoResponse,
        ),
        CsiMessage::GetPluginCapabilities => reply(
            identity.get_plugin_capabilities().await,
            CsiMessage::PluginCapabilitiesResponse,
        ),

        // --- Controller -------------------------------------------------
        CsiMessage::CreateVolume(req) => {
            reply(controller.create_volume(req).await, CsiMessage::VolumeCreated)
        }
        CsiMessage::DeleteVolume(req) => {
            reply(controller.delete_volume(req).await, |()| CsiMessage::Ok)
        }
        CsiMessage::ValidateVolumeCapabilities(req) => reply(
            controller.validate_volume_capabilities(req).await,
            CsiMessage::Validation,
        ),
        CsiMessage::ControllerGetVolume(id) => {
            reply(controller.controller_get_volume(&id).await, CsiMessage::VolumeInfo)
        }
        CsiMessage::ControllerExpandVolume(req) => reply(
            controller.controller_expand_volume(req).await,
            CsiMessage::Expanded,
        ),

        // --- Node -------------------------------------------------------
        CsiMessage::StageVolume(req) => reply(node.stage_volume(req).await, |()| CsiMessage::Ok),
        CsiMessage::UnstageVolume(req) => {
            reply(node.unstage_volume(req).await, |()| CsiMessage::Ok)
        }
        CsiMessage::PublishVolume(req) => {
            reply(node.publish_volume(req).await, |()| CsiMessage::Ok)
        }
        CsiMessage::UnpublishVolume(req) => {
            reply(node.unpublish_volume(req).await, |()| CsiMessage::Ok)
        }
        CsiMessage::NodeExpandVolume(req) => {
            reply(node.expand_volume(req).await, CsiMessage::Expanded)
        }
        CsiMessage::GetNodeCapabilities => {
            reply(node.get_capabilities().await, CsiMessage::NodeCapabilities)
        }
        CsiMessage::GetNodeInfo => reply(node.get_info().await, CsiMessage::NodeInfoResponse),

        // --- Response variants should never arrive as requests ----------
        other => {
            warn!(msg = %other, "unexpected message variant received as request");
            CsiMessage::Error(CsiError::InvalidArgument(format!(
                "unexpected message: {other}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::error::Code;
    use crate::gateway::MemoryConnector;
    use crate::mounter::RecordingRunner;
    use crate::types::{NodeCapability, PluginCapability};

    fn driver() -> Driver {
        Driver::with_parts(
            &DriverConfig::new("node-1"),
            MemoryConnector::default(),
            Arc::new(RecordingRunner::new()),
        )
    }

    #[tokio::test]
    async fn identity_requests() {
        let driver = driver();
        assert!(matches!(
            dispatch(&driver, CsiMessage::Probe).await,
            CsiMessage::ProbeResult(true)
        ));
        match dispatch(&driver, CsiMessage::GetPluginCapabilities).await {
            CsiMessage::PluginCapabilitiesResponse(caps) => {
                assert_eq!(caps, [PluginCapability::ControllerService])
            }
            other => panic!("unexpected response: {other}"),
        }
    }

    #[tokio::test]
    async fn node_capabilities() {
        match dispatch(&driver(), CsiMessage::GetNodeCapabilities).await {
            CsiMessage::NodeCapabilities(caps) => {
                assert_eq!(caps, [NodeCapability::StageUnstageVolume])
            }
            other => panic!("unexpected response: {other}"),
        }
    }

    #[tokio::test]
    async fn response_as_request_is_rejected() {
        match dispatch(&driver(), CsiMessage::Ok).await {
            CsiMessage::Error(e) => assert_eq!(e.code(), Code::InvalidArgument),
            other => panic!("unexpected response: {other}"),
        }
    }

    #[tokio::test]
    async fn unimplemented_rpcs() {
        let driver = driver();
        for request in [
            CsiMessage::ControllerGetVolume("vol-a".into()),
            CsiMessage::ControllerExpandVolume(Default::default()),
            CsiMessage::NodeExpandVolume(Default::default()),
        ] {
            match dispatch(&driver, request).await {
                CsiMessage::Error(e) => assert_eq!(e.code(), Code::Unimplemented),
                other => panic!("unexpected response: {other}"),
            }
        }
    }
}
