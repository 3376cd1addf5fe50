//! Content digests for audit manifests.
//!
//! - SHA-256 over raw file bytes identifies each copied source file
//! - xxh64 over canonical JSON fingerprints a whole manifest
//!
//! Canonical JSON here means serde's declaration-order output with no maps
//! of unspecified order (use `BTreeMap` in anything hashed).

use serde::Serialize;
use sha2::{Digest, Sha256};
use xxhash_rust::xxh64::xxh64;

/// SHA-256 of raw bytes as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// xxh64 fingerprint of a value's canonical JSON, as 16 hex digits.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(format!("{:016x}", xxh64(&bytes, 0)))
}
