//! Volume name normalization.

use sha2::{Digest, Sha256};

/// Longest name that is used verbatim as a bucket name.
pub const MAX_PLAIN_LEN: usize = 63;

/// Turn an orchestrator-chosen volume name into a bucket name.
///
/// The name is lowercased.  Names longer than [`MAX_PLAIN_LEN`] bytes are
/// replaced by the hex SHA-256 digest of the *lowercased* name, which is
/// always 64 characters.  The mapping is deterministic and idempotent for
/// short names; long names are not checked for collisions.
pub fn sanitize_volume_id(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.len() <= MAX_PLAIN_LEN {
        return lower;
    }
    hex::encode(Sha256::digest(lower.as_bytes()))
}
