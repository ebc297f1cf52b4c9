//! Per-worker eviction policies.
//!
//! A policy looks at one worker's resident blocks and names the block to
//! drop next. Blocks on the path currently being inserted are protected and
//! never chosen. When several blocks tie on the policy's primary key, the
//! deeper block goes first (evicting a leaf frees one block, evicting an
//! interior block also drops its descendants), then the lower hash.

use crate::block::BlockHash;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

/// Bookkeeping for one block resident on one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidentBlock {
    pub depth: u32,
    pub inserted_at_ms: u64,
    pub last_access_ms: u64,
    /// Logical access order; ties in wall time never reorder LRU.
    pub last_access_tick: u64,
    pub access_count: u64,
}

impl ResidentBlock {
    pub fn new(depth: u32, now_ms: u64, tick: u64) -> Self {
        Self {
            depth,
            inserted_at_ms: now_ms,
            last_access_ms: now_ms,
            last_access_tick: tick,
            access_count: 1,
        }
    }

    pub fn touch(&mut self, now_ms: u64, tick: u64) {
        self.last_access_ms = now_ms;
        self.last_access_tick = tick;
        self.access_count += 1;
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.inserted_at_ms)
    }
}

/// The blocks resident on one worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerBlocks {
    blocks: HashMap<BlockHash, ResidentBlock>,
}

impl WorkerBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&ResidentBlock> {
        self.blocks.get(hash)
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BlockHash, &ResidentBlock)> {
        self.blocks.iter()
    }

    pub(crate) fn insert(&mut self, hash: BlockHash, block: ResidentBlock) {
        self.blocks.insert(hash, block);
    }

    pub(crate) fn touch(&mut self, hash: &BlockHash, now_ms: u64, tick: u64) {
        if let Some(block) = self.blocks.get_mut(hash) {
            block.touch(now_ms, tick);
        }
    }

    pub(crate) fn remove(&mut self, hash: &BlockHash) -> Option<ResidentBlock> {
        self.blocks.remove(hash)
    }

    pub(crate) fn clear(&mut self) {
        self.blocks.clear();
    }
}

/// Which resident block a full worker gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Oldest last access.
    Lru,
    /// Fewest accesses, oldest last access among equals.
    Lfu,
    /// Blocks older than `ttl_ms` regardless of use. If nothing has expired
    /// and space is still needed, the oldest inserted block goes.
    Ttl { ttl_ms: u64 },
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::Lru
    }
}

impl EvictionPolicy {
    /// Parse a policy name as used in config files.
    pub fn from_name(name: &str, ttl_ms: u64) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "lru" => Some(EvictionPolicy::Lru),
            "lfu" => Some(EvictionPolicy::Lfu),
            "ttl" => Some(EvictionPolicy::Ttl { ttl_ms }),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Ttl { .. } => "ttl",
        }
    }

    /// Whether the policy expires blocks by age.
    pub fn ttl_ms(&self) -> Option<u64> {
        match self {
            EvictionPolicy::Ttl { ttl_ms } => Some(*ttl_ms),
            _ => None,
        }
    }

    pub fn is_expired(&self, block: &ResidentBlock, now_ms: u64) -> bool {
        self.ttl_ms()
            .is_some_and(|ttl| block.age_ms(now_ms) >= ttl)
    }

    /// Pick the next block to evict from `worker`, skipping `protected`.
    pub fn choose_victim(
        &self,
        worker: &WorkerBlocks,
        now_ms: u64,
        protected: &HashSet<BlockHash>,
    ) -> Option<BlockHash> {
        let candidates = worker.iter().filter(|(hash, _)| !protected.contains(hash));

        match self {
            EvictionPolicy::Lru => candidates
                .min_by_key(|(hash, b)| (b.last_access_tick, Reverse(b.depth), **hash))
                .map(|(hash, _)| *hash),
            EvictionPolicy::Lfu => candidates
                .min_by_key(|(hash, b)| {
                    (b.access_count, b.last_access_tick, Reverse(b.depth), **hash)
                })
                .map(|(hash, _)| *hash),
            EvictionPolicy::Ttl { .. } => candidates
                .min_by_key(|(hash, b)| {
                    (
                        !self.is_expired(b, now_ms),
                        b.inserted_at_ms,
                        b.last_access_tick,
                        Reverse(b.depth),
                        **hash,
                    )
                })
                .map(|(hash, _)| *hash),
        }
    }

    /// Every expired, unprotected block on `worker`, shallowest first.
    pub fn expired_blocks(
        &self,
        worker: &WorkerBlocks,
        now_ms: u64,
        protected: &HashSet<BlockHash>,
    ) -> Vec<BlockHash> {
        if self.ttl_ms().is_none() {
            return Vec::new();
        }
        let mut expired: Vec<(u32, BlockHash)> = worker
            .iter()
            .filter(|(hash, b)| !protected.contains(hash) && self.is_expired(b, now_ms))
            .map(|(hash, b)| (b.depth, *hash))
            .collect();
        expired.sort_unstable();
        expired.into_iter().map(|(_, hash)| hash).collect()
    }
}
