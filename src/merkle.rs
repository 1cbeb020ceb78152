//! Merkle root computation over block transactions.
//!
//! Each internal node is the double-SHA256 of its children's concatenated
//! bytes; a level with an odd node count duplicates its last node. The
//! witness tree is the same construction over witness transaction ids,
//! with the coinbase's id pinned to zero since its own witness carries the
//! commitment nonce.

use crate::types::{Block, Hash};

/// Root of the merkle tree over the given leaf hashes. An empty leaf set
/// yields the zero hash; a single leaf is its own root.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::ZERO;
    }
    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(left.as_bytes());
            buf[32..].copy_from_slice(right.as_bytes());
            next.push(Hash::double_sha256(&buf));
        }
        level = next;
    }
    level[0]
}

/// Merkle root over the block's transaction ids.
pub fn block_merkle_root(block: &Block) -> Hash {
    let txids: Vec<Hash> = block.transactions.iter().map(|tx| tx.txid()).collect();
    merkle_root(&txids)
}

/// Merkle root over the block's witness transaction ids, with the coinbase
/// leaf fixed at zero.
pub fn witness_merkle_root(block: &Block) -> Hash {
    let wtxids: Vec<Hash> = block
        .transactions
        .iter()
        .enumerate()
        .map(|(i, tx)| if i == 0 { Hash::ZERO } else { tx.wtxid() })
        .collect();
    merkle_root(&wtxids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_leaves_yield_zero() {
        assert_eq!(merkle_root(&[]), Hash::ZERO);
    }

    #[test]
    fn single_leaf_is_root() {
        let leaf = Hash([0xab; 32]);
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn two_leaves_hash_concatenation() {
        let a = Hash([1; 32]);
        let b = Hash([2; 32]);
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(a.as_bytes());
        buf[32..].copy_from_slice(b.as_bytes());
        assert_eq!(merkle_root(&[a, b]), Hash::double_sha256(&buf));
    }

    #[test]
    fn odd_level_duplicates_last() {
        let a = Hash([1; 32]);
        let b = Hash([2; 32]);
        let c = Hash([3; 32]);
        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[a, b, c, c]));
    }

    #[test]
    fn root_depends_on_every_leaf() {
        let leaves: Vec<Hash> = (0u8..7).map(|i| Hash([i; 32])).collect();
        let root = merkle_root(&leaves);
        for i in 0..leaves.len() {
            let mut tampered = leaves.clone();
            tampered[i].0[0] ^= 0xff;
            assert_ne!(merkle_root(&tampered), root, "leaf {} did not affect root", i);
        }
    }

    #[test]
    fn leaf_order_matters() {
        let a = Hash([1; 32]);
        let b = Hash([2; 32]);
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }
}
