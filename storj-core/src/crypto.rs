//! Cryptographic primitives for the Storj client
//!
//! Provides:
//! - SHA-256 and RIPEMD-160 hashing
//! - The composed `rmd160(sha256(data))` content hash used for shard
//!   hashes and node identifiers
//! - HMAC-SHA512 for audit challenge MACs

use hmac::{Hmac, Mac};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};

/// Length in bytes of the composed content hash (`rmd160(sha256(..))`)
pub const CONTENT_HASH_SIZE: usize = 20;

type HmacSha512 = Hmac<Sha512>;

/// Compute the SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Compute the SHA-256 digest of `data` as a lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Compute the RIPEMD-160 digest of `data`.
pub fn rmd160(data: &[u8]) -> [u8; CONTENT_HASH_SIZE] {
    Ripemd160::digest(data).into()
}

/// Compute the composed content hash `rmd160(sha256(data))`.
///
/// This is the hash used for shard content addresses, node identifiers,
/// and audit tree nodes.
pub fn sha256_rmd160(data: &[u8]) -> [u8; CONTENT_HASH_SIZE] {
    rmd160(&sha256(data))
}

/// Compute the composed content hash as a lowercase hex string.
pub fn sha256_rmd160_hex(data: &[u8]) -> String {
    hex::encode(sha256_rmd160(data))
}

/// Compute HMAC-SHA512 of `data` keyed by `key`.
pub fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut mac = HmacSha512::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 64];
    out.copy_from_slice(digest.as_slice());
    out
}

/// Incremental HMAC-SHA512, fed chunk by chunk while a shard streams through.
#[derive(Clone)]
pub struct ChallengeMac {
    mac: HmacSha512,
}

impl ChallengeMac {
    /// Create a MAC keyed by an audit challenge.
    pub fn new(challenge: &[u8]) -> Self {
        Self {
            mac: HmacSha512::new_from_slice(challenge).expect("HMAC accepts any key length"),
        }
    }

    /// Feed a chunk of shard bytes.
    pub fn update(&mut self, chunk: &[u8]) {
        self.mac.update(chunk);
    }

    /// Finalize into the 64-byte MAC.
    pub fn finalize(self) -> [u8; 64] {
        let digest = self.mac.finalize().into_bytes();
        let mut out = [0u8; 64];
        out.copy_from_slice(digest.as_slice());
        out
    }
}
