//! Audit Merkle trees
//!
//! Farmers are audited by challenge-response: each shard carries a set of
//! random challenges, and the tree built over the challenge MACs is
//! registered with the bridge so it can verify proofs without holding the
//! shard bytes.

use crate::crypto::{sha256_rmd160, ChallengeMac, CONTENT_HASH_SIZE};
use crate::error::{CoreError, Result};

/// A 20-byte tree node (`rmd160(sha256(..))`)
pub type TreeHash = [u8; CONTENT_HASH_SIZE];

/// Filler leaf used to pad the leaf count to the next power of two:
/// the content hash of the empty string.
fn padding_leaf() -> TreeHash {
    sha256_rmd160(b"")
}

fn next_power_of_two(n: usize) -> usize {
    n.next_power_of_two().max(1)
}

/// A binary Merkle tree with a power-of-two leaf count.
///
/// Interior nodes are `rmd160(sha256(left || right))`. Level 0 is the root.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<TreeHash>>,
}

impl MerkleTree {
    /// Build a tree from audit leaves, padding to the next power of two.
    pub fn from_leaves(leaves: Vec<TreeHash>) -> Result<Self> {
        if leaves.is_empty() {
            return Err(CoreError::EmptyAuditTree);
        }

        let mut level = leaves;
        level.resize(next_power_of_two(level.len()), padding_leaf());

        let mut levels = vec![level];
        while levels.last().map(|l| l.len()).unwrap_or(0) > 1 {
            let below = levels.last().expect("at least one level");
            let above: Vec<TreeHash> = below
                .chunks(2)
                .map(|pair| {
                    let mut buf = [0u8; CONTENT_HASH_SIZE * 2];
                    buf[..CONTENT_HASH_SIZE].copy_from_slice(&pair[0]);
                    buf[CONTENT_HASH_SIZE..].copy_from_slice(&pair[1]);
                    sha256_rmd160(&buf)
                })
                .collect();
            levels.push(above);
        }

        levels.reverse();
        Ok(Self { levels })
    }

    /// The tree root.
    pub fn root(&self) -> TreeHash {
        self.levels[0][0]
    }

    /// The tree root as hex.
    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }

    /// Number of levels, root included.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Nodes at `level` (0 = root).
    pub fn level(&self, level: usize) -> Option<&[TreeHash]> {
        self.levels.get(level).map(|l| l.as_slice())
    }

    /// The (padded) leaf row, hex encoded. This is what the bridge stores.
    pub fn leaves_hex(&self) -> Vec<String> {
        self.levels
            .last()
            .expect("tree always has a leaf level")
            .iter()
            .map(hex::encode)
            .collect()
    }
}

/// Incrementally MACs shard bytes under every audit challenge and
/// finalizes into Merkle leaves.
///
/// A leaf is `rmd160(sha256(hex(hmac_sha512(challenge, shard_bytes))))`,
/// matching the content-hash convention used for shard hashes.
pub struct AuditStream {
    macs: Vec<ChallengeMac>,
}

impl AuditStream {
    /// Create a stream over the given challenges.
    pub fn new(challenges: &[Vec<u8>]) -> Self {
        Self {
            macs: challenges.iter().map(|c| ChallengeMac::new(c)).collect(),
        }
    }

    /// Feed a chunk of shard bytes to every challenge MAC.
    pub fn update(&mut self, chunk: &[u8]) {
        for mac in &mut self.macs {
            mac.update(chunk);
        }
    }

    /// Finalize into a Merkle tree over the challenge leaves.
    pub fn finalize(self) -> Result<MerkleTree> {
        let leaves = self
            .macs
            .into_iter()
            .map(|mac| sha256_rmd160(hex::encode(mac.finalize()).as_bytes()))
            .collect();
        MerkleTree::from_leaves(leaves)
    }
}
