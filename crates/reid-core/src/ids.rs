//! Identifier and content-hash helpers.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generate a new time-ordered UUIDv7.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// SHA-256 of `bytes` as lowercase hex; the dedup key for uploaded images.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
