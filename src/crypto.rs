//! Hashing utilities for mining
//!
//! Blake2s-256 is used as the fast hash for transaction, tree and header
//! hashes as well as for the proof-of-work itself.

use crate::serialization::{write_u32, write_varint};
use crate::{BlockTemplate, Error, Hash, HashingBlob, Result, Transaction};
use blake2::{Blake2s256, Digest};

/// Reusable Blake2s hasher for the mining hot loop
pub struct Blake2sHasher {
    hasher: Blake2s256,
}

impl Blake2sHasher {
    pub fn new() -> Self {
        Self {
            hasher: Blake2s256::new(),
        }
    }

    /// Hash data and return the result
    pub fn hash(&mut self, data: &[u8]) -> Hash {
        self.hasher.update(data);
        Hash::new(self.hasher.finalize_reset().into())
    }
}

impl Default for Blake2sHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot fast hash
pub fn fast_hash(data: &[u8]) -> Hash {
    Hash::new(Blake2s256::digest(data).into())
}

pub fn transaction_hash(transaction: &Transaction) -> Result<Hash> {
    Ok(fast_hash(&transaction.to_bytes()?))
}

/// Merkle root over a list of hashes.
///
/// Pairs are hashed level by level; an odd hash at the end of a level is
/// carried up unchanged.
pub fn tree_hash(hashes: &[Hash]) -> Result<Hash> {
    if hashes.is_empty() {
        return Err(Error::invalid_state("Cannot compute tree hash of an empty list"));
    }

    let mut level = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_pair(left, right),
                _ => pair[0],
            })
            .collect();
    }

    Ok(level[0])
}

/// Root reached by folding a leaf with its authentication branch
pub fn tree_hash_from_branch(leaf: &Hash, branch: &[Hash]) -> Hash {
    branch
        .iter()
        .fold(*leaf, |acc, sibling| hash_pair(&acc, sibling))
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left.as_bytes());
    data[32..].copy_from_slice(right.as_bytes());
    fast_hash(&data)
}

/// Hashing blob of the block itself: header, transaction tree root and
/// transaction count. The nonce sits at the end of the header.
fn block_hashing_blob(block: &BlockTemplate) -> Result<HashingBlob> {
    let mut bytes = Vec::with_capacity(96);
    block.write_header(&mut bytes)?;
    let nonce_offset = bytes.len() - 4;

    let mut leaves = Vec::with_capacity(block.transaction_hashes.len() + 1);
    leaves.push(transaction_hash(&block.base_transaction)?);
    leaves.extend_from_slice(&block.transaction_hashes);
    bytes.extend_from_slice(tree_hash(&leaves)?.as_bytes());
    write_varint(&mut bytes, block.transaction_count())?;

    HashingBlob::new(bytes, nonce_offset)
}

/// Hash committed to by the merge-mining tag in the parent block.
///
/// Covers the block header and its own transactions, but not the parent
/// block, so attaching the tag does not change it.
pub fn aux_block_header_hash(block: &BlockTemplate) -> Result<Hash> {
    Ok(fast_hash(block_hashing_blob(block)?.bytes()))
}

/// Identifying hash of a block, used for logging and submission reports
pub fn block_hash(block: &BlockTemplate) -> Result<Hash> {
    match &block.parent_block {
        None => aux_block_header_hash(block),
        Some(_) => {
            let mut data = block_hashing_blob(block)?.bytes().to_vec();
            data.extend_from_slice(proof_of_work_blob(block)?.bytes());
            Ok(fast_hash(&data))
        }
    }
}

/// Bytes the proof-of-work is computed over.
///
/// Version 1 blocks hash their own hashing blob. Merge-mined blocks hash the
/// parent block header (with this block's timestamp and nonce), the root
/// reached from the parent base transaction through its branch, and the
/// parent transaction count; the merge-mining tag in the parent base
/// transaction ties the work to this block.
pub fn proof_of_work_blob(block: &BlockTemplate) -> Result<HashingBlob> {
    let Some(parent) = &block.parent_block else {
        return block_hashing_blob(block);
    };

    let mut bytes = Vec::with_capacity(96);
    write_varint(&mut bytes, parent.major_version as u64)?;
    write_varint(&mut bytes, parent.minor_version as u64)?;
    write_varint(&mut bytes, block.timestamp)?;
    bytes.extend_from_slice(parent.previous_block_hash.as_bytes());
    let nonce_offset = bytes.len();
    write_u32(&mut bytes, block.nonce)?;

    let base_hash = transaction_hash(&parent.base_transaction)?;
    let root = tree_hash_from_branch(&base_hash, &parent.base_transaction_branch);
    bytes.extend_from_slice(root.as_bytes());
    write_varint(&mut bytes, parent.transaction_count)?;

    HashingBlob::new(bytes, nonce_offset)
}

/// Check whether `hash` satisfies `difficulty`.
///
/// The hash is read as a 256-bit little-endian integer; it passes when
/// `hash * difficulty` still fits in 256 bits.
pub fn check_hash(hash: &Hash, difficulty: u64) -> bool {
    if difficulty == 0 {
        return false;
    }

    let mut carry: u128 = 0;
    for word in hash.to_words() {
        let product = word as u128 * difficulty as u128 + carry;
        carry = product >> 64;
    }
    carry == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures;

    #[test]
    fn test_blake2s_hasher_matches_one_shot() {
        let mut hasher = Blake2sHasher::new();
        let first = hasher.hash(b"test data");
        let second = hasher.hash(b"test data");
        assert_eq!(first, second);
        assert_eq!(first, fast_hash(b"test data"));
        assert_ne!(first, hasher.hash(b"different data"));
    }

    #[test]
    fn test_tree_hash_shapes() {
        let a = Hash::new([1; 32]);
        let b = Hash::new([2; 32]);
        let c = Hash::new([3; 32]);

        assert_eq!(tree_hash(&[a]).unwrap(), a);
        assert_eq!(tree_hash(&[a, b]).unwrap(), hash_pair(&a, &b));
        assert_eq!(tree_hash(&[a, b, c]).unwrap(), hash_pair(&hash_pair(&a, &b), &c));
        assert!(tree_hash(&[]).is_err());
    }

    #[test]
    fn test_branch_folding() {
        let leaf = Hash::new([4; 32]);
        assert_eq!(tree_hash_from_branch(&leaf, &[]), leaf);

        let sibling = Hash::new([5; 32]);
        assert_eq!(tree_hash_from_branch(&leaf, &[sibling]), hash_pair(&leaf, &sibling));
    }

    #[test]
    fn test_aux_hash_ignores_parent_block() {
        let block = fixtures::template(2);
        let mut tagged = block.clone();
        tagged
            .parent_block
            .as_mut()
            .unwrap()
            .base_transaction
            .extra = vec![0x03, 0x21];

        assert_eq!(
            aux_block_header_hash(&block).unwrap(),
            aux_block_header_hash(&tagged).unwrap()
        );
        assert_ne!(block_hash(&block).unwrap(), block_hash(&tagged).unwrap());
    }

    #[test]
    fn test_pow_blob_nonce_position() {
        for major in [1, 2] {
            let mut block = fixtures::template(major);
            block.nonce = 0x01020304;
            let blob = proof_of_work_blob(&block).unwrap();
            let offset = blob.nonce_offset();
            assert_eq!(&blob.bytes()[offset..offset + 4], &0x01020304u32.to_le_bytes());
        }
    }

    #[test]
    fn test_check_hash() {
        let zero = Hash::new([0; 32]);
        let max = Hash::new([0xff; 32]);

        assert!(check_hash(&zero, u64::MAX));
        assert!(check_hash(&max, 1));
        assert!(!check_hash(&max, 2));
        assert!(!check_hash(&zero, 0));

        // Top word just under half: passes difficulty 2, fails 3
        let mut bytes = [0u8; 32];
        bytes[31] = 0x7f;
        let half = Hash::new(bytes);
        assert!(check_hash(&half, 2));
        assert!(!check_hash(&half, 3));
    }
}
