//! Cache manager: the trie, per-worker residency and the block arena.
//!
//! The manager answers "how much of this prefix does each worker hold?" and
//! records routed sequences against a worker, evicting under the configured
//! policy when the worker is at capacity. It is not thread-safe on its own;
//! the smart router serializes access to it.

use crate::block::{chunk_tokens, BlockHash, BlockTable, TokenBlock, TokenId};
use crate::clock::Clock;
use crate::eviction::{EvictionPolicy, ResidentBlock, WorkerBlocks};
use crate::trie::{CacheOverlap, PrefixTrie};
use prefixsim_algorithms::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Cache geometry and eviction policy, fixed for the manager's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Tokens per block.
    pub block_size: u32,
    /// Maximum resident blocks per worker.
    pub capacity_blocks: usize,
    pub eviction: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_size: 16,
            capacity_blocks: 4096,
            eviction: EvictionPolicy::Lru,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Freed to make room for a new block.
    Capacity,
    /// Older than the TTL.
    Expired,
}

/// One block leaving one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionEvent {
    pub worker_id: WorkerId,
    pub block_hash: BlockHash,
    pub depth: u32,
    pub reason: EvictionReason,
    pub at_ms: u64,
}

/// Result of recording a sequence against a worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordOutcome {
    pub worker_id: WorkerId,
    /// Blocks the worker already held before this record.
    pub matched_blocks: u32,
    pub inserted_blocks: u32,
    /// Blocks that did not fit after eviction ran out of victims.
    pub skipped_blocks: u32,
    pub evictions: Vec<EvictionEvent>,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub lookups: u64,
    pub lookup_tokens: u64,
    pub records: u64,
    pub recorded_tokens: u64,
    pub hit_tokens: u64,
    pub hit_blocks: u64,
    pub inserted_blocks: u64,
    pub evictions: u64,
    pub capacity_evictions: u64,
    pub expired_evictions: u64,
    pub blocks_per_worker: Vec<usize>,
    /// Distinct blocks held by at least one worker.
    pub unique_blocks: usize,
    pub trie_nodes: usize,
}

impl CacheStats {
    /// Share of recorded tokens that were already cached on the chosen worker.
    pub fn hit_rate(&self) -> f64 {
        if self.recorded_tokens == 0 {
            0.0
        } else {
            self.hit_tokens as f64 / self.recorded_tokens as f64
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    lookups: u64,
    lookup_tokens: u64,
    records: u64,
    recorded_tokens: u64,
    hit_tokens: u64,
    hit_blocks: u64,
    inserted_blocks: u64,
    capacity_evictions: u64,
    expired_evictions: u64,
}

/// Owns every piece of cache state for a fixed set of workers.
#[derive(Debug)]
pub struct CacheManager {
    config: CacheConfig,
    trie: PrefixTrie,
    blocks: BlockTable,
    workers: Vec<WorkerBlocks>,
    clock: Arc<dyn Clock>,
    /// Logical access counter; orders LRU independently of clock resolution.
    tick: u64,
    counters: Counters,
}

impl CacheManager {
    pub fn new(num_workers: usize, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            trie: PrefixTrie::new(config.block_size),
            blocks: BlockTable::new(),
            workers: vec![WorkerBlocks::new(); num_workers],
            clock,
            tick: 0,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn trie(&self) -> &PrefixTrie {
        &self.trie
    }

    pub fn block_table(&self) -> &BlockTable {
        &self.blocks
    }

    fn chunk(&self, tokens: &[TokenId]) -> Vec<TokenBlock> {
        chunk_tokens(tokens, self.config.block_size as usize)
    }

    /// Cached prefix of `tokens` on every worker, without touching counters.
    pub fn overlaps(&self, tokens: &[TokenId]) -> BTreeMap<WorkerId, CacheOverlap> {
        let blocks = self.chunk(tokens);
        let matches = self.trie.find_matches(&blocks);
        (0..self.workers.len() as WorkerId)
            .map(|w| (w, matches.get(&w).copied().unwrap_or_default()))
            .collect()
    }

    /// Cached prefix of `tokens` on every worker. Counts as one lookup.
    pub fn lookup(&mut self, tokens: &[TokenId]) -> BTreeMap<WorkerId, CacheOverlap> {
        self.counters.lookups += 1;
        self.counters.lookup_tokens += tokens.len() as u64;
        self.overlaps(tokens)
    }

    /// Record `tokens` as cached on `worker`.
    ///
    /// Blocks the worker already holds are touched. New blocks are inserted
    /// in order; when the worker is full the eviction policy frees space,
    /// never from the path being recorded. Blocks that still do not fit are
    /// skipped, leaving a partial cache.
    pub fn record(&mut self, tokens: &[TokenId], worker: WorkerId) -> RecordOutcome {
        let idx = worker as usize;
        if idx >= self.workers.len() {
            warn!(worker, "record for unknown worker ignored");
            return RecordOutcome {
                worker_id: worker,
                ..Default::default()
            };
        }

        self.tick += 1;
        let now = self.clock.now_ms();
        let tick = self.tick;
        let blocks = self.chunk(tokens);

        self.counters.records += 1;
        self.counters.recorded_tokens += tokens.len() as u64;

        let held = self.trie.held_prefix(worker, &blocks);
        self.counters.hit_blocks += held as u64;
        self.counters.hit_tokens += held as u64 * self.config.block_size as u64;
        for block in &blocks[..held] {
            self.workers[idx].touch(&block.hash, now, tick);
            self.blocks.touch(&block.hash, now);
        }

        let mut outcome = RecordOutcome {
            worker_id: worker,
            matched_blocks: held as u32,
            ..Default::default()
        };

        let needed = blocks.len() - held;
        if needed == 0 {
            return outcome;
        }

        let protected: HashSet<BlockHash> = blocks.iter().map(|b| b.hash).collect();

        if self.config.eviction.ttl_ms().is_some() {
            let expired =
                self.config
                    .eviction
                    .expired_blocks(&self.workers[idx], now, &protected);
            for hash in expired {
                // An earlier subtree removal may already have taken it.
                if self.workers[idx].contains(&hash) {
                    let events = self.evict(worker, hash, EvictionReason::Expired, now);
                    outcome.evictions.extend(events);
                }
            }
        }

        let capacity = self.config.capacity_blocks;
        while capacity.saturating_sub(self.workers[idx].len()) < needed {
            let Some(victim) =
                self.config
                    .eviction
                    .choose_victim(&self.workers[idx], now, &protected)
            else {
                break;
            };
            let events = self.evict(worker, victim, EvictionReason::Capacity, now);
            outcome.evictions.extend(events);
        }

        let fit = needed.min(capacity.saturating_sub(self.workers[idx].len()));
        let path = &blocks[..held + fit];
        let added = self.trie.insert(path, worker);
        for block in &path[held..] {
            self.blocks.intern(block, now);
        }
        for block in path.iter().filter(|b| added.contains(&b.hash)) {
            self.workers[idx].insert(block.hash, ResidentBlock::new(block.depth, now, tick));
        }

        outcome.inserted_blocks = added.len() as u32;
        outcome.skipped_blocks = (needed - fit) as u32;
        self.counters.inserted_blocks += added.len() as u64;

        debug!(
            worker,
            matched = outcome.matched_blocks,
            inserted = outcome.inserted_blocks,
            skipped = outcome.skipped_blocks,
            evicted = outcome.evictions.len(),
            "recorded sequence"
        );
        outcome
    }

    /// Drop `hash` and the worker's descendants of it from `worker`.
    fn evict(
        &mut self,
        worker: WorkerId,
        hash: BlockHash,
        reason: EvictionReason,
        now: u64,
    ) -> Vec<EvictionEvent> {
        let removal = self.trie.remove_subtree(worker, hash);
        let resident = &mut self.workers[worker as usize];

        let events: Vec<EvictionEvent> = removal
            .removed
            .iter()
            .filter_map(|h| resident.remove(h).map(|block| (h, block)))
            .map(|(h, block)| EvictionEvent {
                worker_id: worker,
                block_hash: *h,
                depth: block.depth,
                reason,
                at_ms: now,
            })
            .collect();

        for h in &removal.pruned {
            self.blocks.remove(h);
        }

        match reason {
            EvictionReason::Capacity => self.counters.capacity_evictions += events.len() as u64,
            EvictionReason::Expired => self.counters.expired_evictions += events.len() as u64,
        }
        debug!(
            worker,
            block = hash.0,
            dropped = events.len(),
            ?reason,
            "evicted block"
        );
        events
    }

    /// Remove every expired block on every worker. No-op unless the policy is TTL.
    pub fn purge_expired(&mut self) -> Vec<EvictionEvent> {
        if self.config.eviction.ttl_ms().is_none() {
            return Vec::new();
        }
        let now = self.clock.now_ms();
        let none = HashSet::new();
        let mut events = Vec::new();

        for worker in 0..self.workers.len() {
            let expired =
                self.config
                    .eviction
                    .expired_blocks(&self.workers[worker], now, &none);
            for hash in expired {
                if self.workers[worker].contains(&hash) {
                    events.extend(self.evict(
                        worker as WorkerId,
                        hash,
                        EvictionReason::Expired,
                        now,
                    ));
                }
            }
        }
        events
    }

    pub fn worker_block_count(&self, worker: WorkerId) -> usize {
        self.workers
            .get(worker as usize)
            .map(WorkerBlocks::len)
            .unwrap_or(0)
    }

    pub fn worker_blocks(&self, worker: WorkerId) -> Option<&WorkerBlocks> {
        self.workers.get(worker as usize)
    }

    /// Whether `worker` holds the block with sequence hash `hash`.
    pub fn contains(&self, worker: WorkerId, hash: &BlockHash) -> bool {
        self.worker_blocks(worker)
            .is_some_and(|blocks| blocks.contains(hash))
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            lookups: c.lookups,
            lookup_tokens: c.lookup_tokens,
            records: c.records,
            recorded_tokens: c.recorded_tokens,
            hit_tokens: c.hit_tokens,
            hit_blocks: c.hit_blocks,
            inserted_blocks: c.inserted_blocks,
            evictions: c.capacity_evictions + c.expired_evictions,
            capacity_evictions: c.capacity_evictions,
            expired_evictions: c.expired_evictions,
            blocks_per_worker: self.workers.iter().map(WorkerBlocks::len).collect(),
            unique_blocks: self.blocks.len(),
            trie_nodes: self.trie.node_count(),
        }
    }

    /// Clear all cache state and counters.
    pub fn reset(&mut self) {
        self.trie.clear();
        self.blocks.clear();
        for worker in &mut self.workers {
            worker.clear();
        }
        self.tick = 0;
        self.counters = Counters::default();
    }

    /// Check trie structure, residency consistency and the capacity bound.
    pub fn validate(&self) -> Result<(), String> {
        self.trie.validate()?;

        if self.blocks.len() != self.trie.node_count() {
            return Err(format!(
                "arena holds {} blocks but trie has {} nodes",
                self.blocks.len(),
                self.trie.node_count()
            ));
        }

        for (idx, resident) in self.workers.iter().enumerate() {
            let worker = idx as WorkerId;
            if resident.len() > self.config.capacity_blocks {
                return Err(format!(
                    "worker {} holds {} blocks over capacity {}",
                    worker,
                    resident.len(),
                    self.config.capacity_blocks
                ));
            }
            if resident.len() != self.trie.worker_node_count(worker) {
                return Err(format!(
                    "worker {} residency ({}) disagrees with trie ({})",
                    worker,
                    resident.len(),
                    self.trie.worker_node_count(worker)
                ));
            }
            for (hash, _) in resident.iter() {
                if !self.trie.contains(worker, hash) {
                    return Err(format!("worker {} resident {:?} missing from trie", worker, hash));
                }
                if !self.blocks.contains(hash) {
                    return Err(format!("resident {:?} missing from arena", hash));
                }
            }
        }
        Ok(())
    }
}
