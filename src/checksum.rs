// src/checksum.rs

//! Content fingerprints for updateable module resources.
//!
//! The engine records a `u64` fingerprint per managed module location so a
//! redeploy can tell whether snapshot content actually changed. The value
//! is the leading eight bytes of a SHA-256 digest over the stream.

use std::io::Read;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Compute the fingerprint of a content stream, consuming it.
pub fn stream_checksum(reader: &mut dyn Read) -> Result<u64> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    Ok(u64::from_be_bytes(prefix))
}
