//! Storj Core Library
//!
//! Core abstractions for the Storj client:
//! - Cryptographic primitives (SHA-256, RIPEMD-160, HMAC-SHA512, secp256k1)
//! - Key material with address derivation and message signing
//! - Audit Merkle trees over challenge-keyed MACs
//! - Shard model and staircase shard sizing

pub mod crypto;
pub mod error;
pub mod keypair;
pub mod merkle;
pub mod shard;

pub use error::{CoreError, Result};
pub use keypair::KeyPair;
pub use merkle::{AuditStream, MerkleTree};
pub use shard::{shard_size_for, ShardHasher, ShardMeta};

/// Shard size staircase bounds. Sizes are always a power of two.
pub const MIN_SHARD_SIZE: u64 = 2 * 1024 * 1024; // 2 MiB
pub const MAX_SHARD_SIZE: u64 = 8 * 1024 * 1024; // 8 MiB

/// Upper bound on the number of shards a single file may demux into
/// before the staircase steps up to the next shard size.
pub const MAX_SHARDS_PER_FILE: u64 = 512;

/// Number of random audit challenges generated per shard.
pub const CHALLENGES_PER_SHARD: usize = 4;

/// Size of a single audit challenge in bytes.
pub const CHALLENGE_SIZE: usize = 32;
