//! Stable fingerprints for rendered objects.

use crate::{Error, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hex sha256 of a byte slice.
pub fn hash_bytes(b: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b);
    hex::encode(hasher.finalize())
}

/// Serialize an object to JSON and hash that.
///
/// NOTE: always JSON, even for values that end up stored as YAML. YAML map
/// serialization is not stable across round trips, which causes flapping
/// hashes and endless reconcile loops; serde_json emits BTreeMap keys in
/// order.
pub fn hash_object<T: Serialize>(o: &T) -> Result<(Vec<u8>, String)> {
    let b = serde_json::to_vec(o).map_err(Error::SerializationError)?;
    let hash = hash_bytes(&b);
    Ok((b, hash))
}
