//! # libcsi: S3 volumes over a simplified CSI for RK8s
//!
//! `libcsi` exposes object-storage buckets as volumes through a lightweight
//! [Container Storage Interface][csi] layer that uses QUIC (via [`quinn`])
//! instead of gRPC for transport.  Each volume is one bucket that carries
//! its own `metadata.json` record; nodes make it visible through a FUSE
//! tool (`s3fs` or `rclone`).  It follows the RK8s architecture conventions
//! (Tokio async runtime, `tracing` for observability, `thiserror` for
//! structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `VolumeId`, capabilities, requests. |
//! | [`error`] | [`CsiError`] and the gateway's `StoreError`. |
//! | [`config`] | Per-request `S3Config` and process-wide `DriverConfig`. |
//! | [`sanitize`] | Volume name to bucket name. |
//! | [`metadata`] | The volume record stored inside each bucket. |
//! | [`gateway`] | Object store operations (S3 and in-memory). |
//! | [`mounter`] | FUSE mounter strategies and process execution. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait: volume create/delete/validate. |
//! | [`node`] | [`CsiNode`] trait: stage, publish, unpublish, unstage. |
//! | [`backend`] | Controller and Node services over the object store. |
//! | [`driver`] | [`Driver`] composition of the three services. |
//! | [`message`] | [`CsiMessage`] protocol envelope for QUIC transport. |
//! | [`transport`] | QUIC server and request dispatch built on `quinn`. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod message;
pub mod metadata;
pub mod mounter;
pub mod node;
pub mod sanitize;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use config::{DriverConfig, S3Config};
pub use controller::CsiController;
pub use driver::Driver;
pub use error::{Code, CsiError, StoreError};
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use node::CsiNode;
pub use types::*;
