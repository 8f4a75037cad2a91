//! CSI error types.
//!
//! All errors surfaced by the CSI services are represented by the
//! [`CsiError`] enum, which derives [`thiserror::Error`] and also implements
//! [`Serialize`]/[`Deserialize`] so errors can travel across the QUIC
//! transport layer.  The object store gateway reports its own
//! [`StoreError`], which folds into [`CsiError`] at the service boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// gRPC-style status codes reported to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    /// Client specified an invalid argument.
    InvalidArgument,
    /// Some requested entity was not found.
    NotFound,
    /// Some entity that we attempted to create already exists.
    AlreadyExists,
    /// Operation is not implemented or not supported.
    Unimplemented,
    /// Internal error.
    Internal,
    /// The service is currently unavailable.
    Unavailable,
}

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// The requested volume already exists with an incompatible capacity.
    #[error("volume {0} already exists")]
    VolumeAlreadyExists(String),

    /// The requested volume was not found.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// A mount operation failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An unmount operation failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The object store returned an error.
    #[error("backend error: {0}")]
    BackendError(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The RPC is not supported by this plugin.
    #[error("{0} is not implemented")]
    Unimplemented(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsiError {
    /// Create a [`CsiError::BackendError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn backend<E: std::fmt::Display>(e: E) -> Self {
        Self::BackendError(e.to_string())
    }

    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Shorthand for a missing request field.
    pub fn missing(field: &str) -> Self {
        Self::InvalidArgument(format!("{field} missing in request"))
    }

    /// The status code the orchestrator sees for this error.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::VolumeNotFound(_) => Code::NotFound,
            Self::VolumeAlreadyExists(_) => Code::AlreadyExists,
            Self::Unimplemented(_) => Code::Unimplemented,
            Self::TransportError(_) => Code::Unavailable,
            Self::MountFailed { .. }
            | Self::UnmountFailed { .. }
            | Self::BackendError(_)
            | Self::Internal(_) => Code::Internal,
        }
    }
}

/// A single object that could not be removed during a batch delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub reason: String,
}

/// Errors reported by an [`ObjectStoreGateway`](crate::gateway::ObjectStoreGateway).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The client could not be built from the supplied configuration.
    #[error("failed to initialize object store client: {0}")]
    Client(String),

    /// A single store request failed.
    #[error("{op} on bucket {bucket}: {reason}")]
    Request {
        op: &'static str,
        bucket: String,
        reason: String,
    },

    #[error("bucket {0} already exists")]
    BucketAlreadyExists(String),

    #[error("bucket {0} does not exist")]
    NoSuchBucket(String),

    #[error("object {key} not found in bucket {bucket}")]
    ObjectNotFound { bucket: String, key: String },

    /// Enumerating the bucket failed; objects seen so far may have been
    /// removed, and `failures` holds those that could not be.
    #[error(
        "failed to list objects of bucket {bucket}: {source}{}",
        survivors(.failures)
    )]
    Listing {
        bucket: String,
        #[source]
        source: Box<StoreError>,
        failures: Vec<DeleteFailure>,
    },

    /// Some objects survived the batch delete; the bucket was left in place.
    #[error(
        "failed to remove {} objects of bucket {bucket}: {}",
        .failures.len(),
        summarize(.failures)
    )]
    PartialDelete {
        bucket: String,
        failures: Vec<DeleteFailure>,
    },
}

impl StoreError {
    pub fn request<E: std::fmt::Display>(op: &'static str, bucket: &str, e: E) -> Self {
        Self::Request {
            op,
            bucket: bucket.to_owned(),
            reason: e.to_string(),
        }
    }
}

const SUMMARY_LIMIT: usize = 5;

fn summarize(failures: &[DeleteFailure]) -> String {
    let mut out = failures
        .iter()
        .take(SUMMARY_LIMIT)
        .map(|f| format!("{} ({})", f.key, f.reason))
        .collect::<Vec<_>>()
        .join(", ");
    if failures.len() > SUMMARY_LIMIT {
        out.push_str(&format!(", and {} more", failures.len() - SUMMARY_LIMIT));
    }
    out
}

fn survivors(failures: &[DeleteFailure]) -> String {
    if failures.is_empty() {
        return String::new();
    }
    format!(
        "; failed to remove {} objects: {}",
        failures.len(),
        summarize(failures)
    )
}

impl From<StoreError> for CsiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Client(_) => CsiError::Internal(e.to_string()),
            other => CsiError::BackendError(other.to_string()),
        }
    }
}
