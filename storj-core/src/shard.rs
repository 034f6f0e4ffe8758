//! Shard model and sizing
//!
//! A shard is a contiguous byte range of a source file: the unit of
//! placement and retrieval. Shard metadata (content hash, audit challenges,
//! audit tree) is finalized once the shard's byte stream ends.

use crate::crypto::CONTENT_HASH_SIZE;
use crate::error::Result;
use crate::merkle::{AuditStream, MerkleTree};
use crate::{CHALLENGES_PER_SHARD, CHALLENGE_SIZE, MAX_SHARDS_PER_FILE, MAX_SHARD_SIZE, MIN_SHARD_SIZE};
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Pick the shard size for a file: the smallest power of two at least
/// `MIN_SHARD_SIZE` that keeps the shard count within `MAX_SHARDS_PER_FILE`,
/// capped at `MAX_SHARD_SIZE`.
pub fn shard_size_for(file_size: u64) -> u64 {
    let mut size = MIN_SHARD_SIZE;
    while size < MAX_SHARD_SIZE {
        let shards = (file_size + size - 1) / size;
        if shards <= MAX_SHARDS_PER_FILE {
            break;
        }
        size *= 2;
    }
    size
}

/// Finalized shard metadata, as registered with the bridge when the shard
/// is added to a staging frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardMeta {
    /// 0-based position within the file
    pub index: usize,

    /// Content hash `rmd160(sha256(bytes))`, hex encoded
    pub hash: String,

    /// Shard length in bytes
    pub size: u64,

    /// Audit tree leaves, hex encoded
    pub tree: Vec<String>,

    /// Audit challenges, hex encoded
    pub challenges: Vec<String>,
}

/// Accumulates a shard's running content hash and audit tree while its
/// bytes stream through.
pub struct ShardHasher {
    index: usize,
    size: u64,
    sha: Sha256,
    audit: AuditStream,
    challenges: Vec<Vec<u8>>,
}

impl ShardHasher {
    /// Create a hasher for shard `index` with freshly generated challenges.
    pub fn new(index: usize) -> Self {
        use rand::RngCore;

        let mut challenges = Vec::with_capacity(CHALLENGES_PER_SHARD);
        for _ in 0..CHALLENGES_PER_SHARD {
            let mut challenge = vec![0u8; CHALLENGE_SIZE];
            rand::rngs::OsRng.fill_bytes(&mut challenge);
            challenges.push(challenge);
        }

        Self {
            index,
            size: 0,
            sha: Sha256::new(),
            audit: AuditStream::new(&challenges),
            challenges,
        }
    }

    /// Feed a chunk of shard bytes.
    pub fn update(&mut self, chunk: &[u8]) {
        self.size += chunk.len() as u64;
        self.sha.update(chunk);
        self.audit.update(chunk);
    }

    /// Bytes consumed so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Shard index this hasher belongs to.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Finalize into shard metadata. Consumes the hasher.
    pub fn finalize(self) -> Result<ShardMeta> {
        let digest: [u8; 32] = self.sha.finalize().into();
        let hash: [u8; CONTENT_HASH_SIZE] = Ripemd160::digest(digest).into();
        let tree: MerkleTree = self.audit.finalize()?;

        Ok(ShardMeta {
            index: self.index,
            hash: hex::encode(hash),
            size: self.size,
            tree: tree.leaves_hex(),
            challenges: self.challenges.iter().map(hex::encode).collect(),
        })
    }
}
