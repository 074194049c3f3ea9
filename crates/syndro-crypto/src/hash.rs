use crate::error::CryptoError;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Streams `path` through SHA-256, never holding more than one chunk in
/// memory, and returns the lowercase hex digest.
pub async fn hash_file(path: &Path) -> Result<String, CryptoError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hashes an in-memory string, returning the full lowercase hex digest.
pub fn hash_string(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derives a deterministic transfer id from a sender/receiver/items manifest
/// (spec §3: "a deterministic 64-bit SHA-256 prefix"): the first 8 bytes (16
/// hex characters) of the manifest's SHA-256 digest.
pub fn transfer_id(manifest: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(manifest.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}
