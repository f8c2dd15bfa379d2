//! Test fixtures for generating test data.

use sha2::{Digest, Sha256};
use stitch_metadata::NewUpload;
use time::OffsetDateTime;
use uuid::Uuid;

/// Generate deterministic test data based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    data
}

/// Compute SHA-256 hash of data as hex string.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn sha256_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// A registration for `file_name` with one hash per entry of `hashes`.
#[allow(dead_code)]
pub fn new_upload(file_name: &str, hashes: &[&str]) -> NewUpload {
    NewUpload {
        upload_id: Uuid::new_v4(),
        namespace: String::new(),
        relative_path: String::new(),
        file_name: file_name.to_string(),
        file_size: 10,
        chunk_hashes: hashes.iter().map(|h| h.to_string()).collect(),
        created_at: OffsetDateTime::now_utc(),
    }
}

/// `count` distinct content hashes derived from seeded data.
#[allow(dead_code)]
pub fn distinct_hashes(count: usize) -> Vec<String> {
    (0..count as u64)
        .map(|i| sha256_hash(&seeded_bytes(i, 64)))
        .collect()
}
