//! rkcsi: the RK8s S3 CSI plugin.
//!
//! Serves the Identity, Controller and Node services over QUIC.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use libcsi::config::{DEFAULT_DRIVER_NAME, default_credentials_dir};
use libcsi::transport::CsiServer;
use libcsi::{Driver, DriverConfig};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Run the S3 CSI plugin in the foreground.
///
/// Log verbosity follows RUST_LOG (default: info).  Stop it with SIGINT.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about, verbatim_doc_comment)]
struct Cli {
    /// Identifier of the node this plugin runs on
    #[arg(long, env = "RKCSI_NODE_ID")]
    node_id: String,

    /// UDP address the QUIC endpoint listens on
    #[arg(long, default_value = "0.0.0.0:7443")]
    listen: SocketAddr,

    /// PEM-encoded certificate chain
    #[arg(long)]
    tls_cert: PathBuf,

    /// PEM-encoded private key
    #[arg(long)]
    tls_key: PathBuf,

    /// Name reported by GetPluginInfo
    #[arg(long, default_value = DEFAULT_DRIVER_NAME)]
    driver_name: String,

    /// Mounter used when a volume does not choose one (s3fs or rclone)
    #[arg(long, default_value = "")]
    default_mounter: String,

    /// Directory for mounter credential files (default: $HOME)
    #[arg(long)]
    credentials_dir: Option<PathBuf>,

    /// Volumes this node accepts; 0 means unlimited
    #[arg(long, default_value_t = 0)]
    max_volumes: u64,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    if let Err(err) = execute(cli).await {
        error!("{err:#}");
        eprintln!("ERROR: {err:#}");
        process::exit(1);
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let tls = server_tls_config(&cli.tls_cert, &cli.tls_key)?;

    let config = DriverConfig {
        driver_name: cli.driver_name,
        node_id: cli.node_id,
        default_mounter: cli.default_mounter,
        credentials_dir: cli.credentials_dir.unwrap_or_else(default_credentials_dir),
        max_volumes_per_node: cli.max_volumes,
    };
    info!(
        driver = %config.driver_name,
        node = %config.node_id,
        mounter = %config.default_mounter,
        "starting CSI plugin"
    );

    let driver = Driver::s3(&config);
    let server = CsiServer::new(cli.listen, tls, driver)
        .with_context(|| format!("failed to listen on {}", cli.listen))?;

    tokio::select! {
        res = server.serve() => res.context("CSI server stopped")?,
        res = tokio::signal::ctrl_c() => {
            res.context("failed to wait for SIGINT")?;
            info!("interrupted, shutting down");
            server.endpoint().close(0u32.into(), b"shutdown");
            server.endpoint().wait_idle().await;
        }
    }
    Ok(())
}

fn server_tls_config(cert: &Path, key: &Path) -> anyhow::Result<rustls::ServerConfig> {
    let chain = CertificateDer::pem_file_iter(cert)
        .with_context(|| format!("{}: failed to open certificate", cert.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("{}: failed to parse certificate", cert.display()))?;
    let key = PrivateKeyDer::from_pem_file(key)
        .with_context(|| format!("{}: failed to parse private key", key.display()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .context("TLS 1.3 unavailable")?
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .context("invalid certificate or key")?;
    Ok(config)
}
