//! Token blocks, their signatures, and the block arena.
//!
//! A token sequence is cut into fixed-size blocks. Each block gets two
//! signatures:
//! - a [`LocalBlockHash`] over its own tokens, used to key trie children;
//! - a [`BlockHash`] chaining the parent's hash with the local hash, which
//!   identifies one block at one prefix position and keys the [`BlockTable`].
//!
//! Identical token runs under identical prefixes always produce the same
//! `BlockHash`. A trailing partial block is never produced: partial blocks
//! are not cacheable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use xxhash_rust::xxh3;

/// Token identifier as produced by the external tokenizer.
pub type TokenId = u32;

pub const XXH3_SEED: u64 = 1337;

/// Hash of a single block's tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalBlockHash(pub u64);

/// Hash of a block together with everything before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash(pub u64);

/// Hash the little-endian bytes of a block's tokens.
pub fn compute_block_hash(tokens: &[TokenId]) -> LocalBlockHash {
    let bytes: Vec<u8> = tokens.iter().flat_map(|t| t.to_le_bytes()).collect();
    LocalBlockHash(xxh3::xxh3_64_with_seed(&bytes, XXH3_SEED))
}

/// Chain a block's local hash onto its parent's sequence hash.
pub fn chain_hash(parent: Option<BlockHash>, local: LocalBlockHash) -> BlockHash {
    match parent {
        None => BlockHash(local.0),
        Some(parent) => {
            let mut bytes = [0u8; 16];
            bytes[..8].copy_from_slice(&parent.0.to_le_bytes());
            bytes[8..].copy_from_slice(&local.0.to_le_bytes());
            BlockHash(xxh3::xxh3_64_with_seed(&bytes, XXH3_SEED))
        }
    }
}

/// One full block of a token sequence, as produced by [`chunk_tokens`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBlock {
    pub tokens: Vec<TokenId>,
    pub local_hash: LocalBlockHash,
    pub hash: BlockHash,
    pub parent: Option<BlockHash>,
    /// Position in the sequence, starting at 1 for the first block.
    pub depth: u32,
}

/// Split `tokens` into full blocks of `block_size`; the remainder is dropped.
pub fn chunk_tokens(tokens: &[TokenId], block_size: usize) -> Vec<TokenBlock> {
    if block_size == 0 {
        return Vec::new();
    }

    let mut parent = None;
    tokens
        .chunks_exact(block_size)
        .enumerate()
        .map(|(i, chunk)| {
            let local_hash = compute_block_hash(chunk);
            let hash = chain_hash(parent, local_hash);
            let block = TokenBlock {
                tokens: chunk.to_vec(),
                local_hash,
                hash,
                parent,
                depth: i as u32 + 1,
            };
            parent = Some(hash);
            block
        })
        .collect()
}

/// Number of blocks a sequence occupies, counting a trailing partial block.
pub fn blocks_spanned(num_tokens: usize, block_size: usize) -> u32 {
    if block_size == 0 {
        return 0;
    }
    num_tokens.div_ceil(block_size) as u32
}

/// A block stored in the arena.
#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub hash: BlockHash,
    pub local_hash: LocalBlockHash,
    pub parent: Option<BlockHash>,
    pub tokens: Vec<TokenId>,
    pub depth: u32,
    pub created_at_ms: u64,
    pub last_access_ms: u64,
}

/// Arena owning every block any worker holds, keyed by sequence hash.
///
/// The trie and the per-worker residency sets refer to blocks only by
/// [`BlockHash`].
#[derive(Debug, Default)]
pub struct BlockTable {
    blocks: HashMap<BlockHash, Block>,
}

impl BlockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Store `block` if it is new, otherwise refresh its access time.
    /// Returns true if the block was created.
    pub fn intern(&mut self, block: &TokenBlock, now_ms: u64) -> bool {
        if let Some(existing) = self.blocks.get_mut(&block.hash) {
            existing.last_access_ms = now_ms;
            return false;
        }
        self.blocks.insert(
            block.hash,
            Block {
                hash: block.hash,
                local_hash: block.local_hash,
                parent: block.parent,
                tokens: block.tokens.clone(),
                depth: block.depth,
                created_at_ms: now_ms,
                last_access_ms: now_ms,
            },
        );
        true
    }

    /// Refresh a block's last access time.
    pub fn touch(&mut self, hash: &BlockHash, now_ms: u64) {
        if let Some(block) = self.blocks.get_mut(hash) {
            block.last_access_ms = now_ms;
        }
    }

    pub fn remove(&mut self, hash: &BlockHash) -> Option<Block> {
        self.blocks.remove(hash)
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }
}
