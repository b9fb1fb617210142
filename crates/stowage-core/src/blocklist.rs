//! Blocklists: the ordered block hashes of one file, split into blocklist
//! blocks that are themselves stored as ordinary content blocks.

use stowage_types::{ContentHasher, Digest};

use crate::error::{Result, StowageError};

/// Number of block hashes that fit in one blocklist block.
pub fn hashes_per_blocklist(block_size: u32, digest_size: usize) -> usize {
    (block_size as usize / digest_size.max(1)).max(1)
}

/// Number of blocklist blocks a blockset of `block_count` blocks needs.
///
/// Single-block files are referenced by their block hash directly and carry
/// no blocklist.
pub fn blocklist_count(block_count: usize, per_blocklist: usize) -> usize {
    if block_count <= 1 {
        0
    } else {
        block_count.div_ceil(per_blocklist)
    }
}

/// Content of the `index`-th blocklist block: the concatenated hashes.
pub fn blocklist_chunk(blocks: &[Digest], index: usize, per_blocklist: usize) -> Option<Vec<u8>> {
    let start = index.checked_mul(per_blocklist)?;
    if start >= blocks.len() {
        return None;
    }
    let end = (start + per_blocklist).min(blocks.len());
    let mut out = Vec::with_capacity((end - start) * blocks[start].len());
    for hash in &blocks[start..end] {
        out.extend_from_slice(hash.as_bytes());
    }
    Some(out)
}

/// Every blocklist block of a blockset as `(hash, content)` pairs, in order.
pub fn build_blocklists(
    blocks: &[Digest],
    per_blocklist: usize,
    hasher: &ContentHasher,
) -> Vec<(Digest, Vec<u8>)> {
    (0..blocklist_count(blocks.len(), per_blocklist))
        .filter_map(|i| blocklist_chunk(blocks, i, per_blocklist))
        .map(|data| (hasher.hash(&data), data))
        .collect()
}

/// Split blocklist content back into block hashes.
pub fn split_blocklist(data: &[u8], digest_size: usize) -> Result<Vec<Digest>> {
    if digest_size == 0 || data.len() % digest_size != 0 {
        return Err(StowageError::InvalidFormat(format!(
            "blocklist length {} is not a multiple of digest size {digest_size}",
            data.len()
        )));
    }
    Ok(data.chunks(digest_size).map(Digest::from_slice).collect())
}

/// A blocklist block is valid only when its content hashes to its name.
pub fn verify_blocklist(hash: &Digest, data: &[u8], hasher: &ContentHasher) -> Result<()> {
    let actual = hasher.hash(data);
    if &actual != hash {
        return Err(StowageError::InternalConsistency(format!(
            "blocklist block has wrong hash, {} vs {}",
            actual.to_hex(),
            hash.to_hex()
        )));
    }
    Ok(())
}
