/// Integration tests for the cache manager and its eviction policies.
use prefixsim_core::block::{chunk_tokens, BlockHash, TokenId};
use prefixsim_core::cache::{CacheConfig, CacheManager, EvictionReason};
use prefixsim_core::clock::SimClock;
use prefixsim_core::eviction::EvictionPolicy;
use proptest::prelude::*;
use std::sync::Arc;

fn manager(workers: usize, capacity: usize, eviction: EvictionPolicy) -> (CacheManager, Arc<SimClock>) {
    let clock = Arc::new(SimClock::new());
    let config = CacheConfig {
        block_size: 4,
        capacity_blocks: capacity,
        eviction,
    };
    (CacheManager::new(workers, config, clock.clone()), clock)
}

/// A one-block sequence filled with `t`.
fn single(t: TokenId) -> Vec<TokenId> {
    vec![t; 4]
}

fn hash_of(tokens: &[TokenId]) -> BlockHash {
    chunk_tokens(tokens, 4)[0].hash
}

#[test]
fn test_lru_evicts_least_recently_used() {
    let (mut cache, _) = manager(1, 4, EvictionPolicy::Lru);
    for t in [1, 2, 3, 4] {
        cache.record(&single(t), 0);
    }
    // Touch 1 so 2 becomes the oldest.
    cache.record(&single(1), 0);

    let outcome = cache.record(&single(5), 0);
    assert_eq!(outcome.evictions.len(), 1);
    assert_eq!(outcome.evictions[0].block_hash, hash_of(&single(2)));
    assert_eq!(outcome.evictions[0].reason, EvictionReason::Capacity);
    assert!(cache.contains(0, &hash_of(&single(1))));
    assert!(cache.contains(0, &hash_of(&single(5))));
    assert_eq!(cache.worker_block_count(0), 4);
    assert!(cache.validate().is_ok());
}

#[test]
fn test_lfu_and_lru_pick_different_victims() {
    // 1 is hot but stale; 4 is fresh but used once.
    let history = [1, 1, 1, 2, 2, 3, 3, 4];

    let (mut lru, _) = manager(1, 4, EvictionPolicy::Lru);
    let (mut lfu, _) = manager(1, 4, EvictionPolicy::Lfu);
    for t in history {
        lru.record(&single(t), 0);
        lfu.record(&single(t), 0);
    }

    let lru_victim = lru.record(&single(9), 0).evictions[0].block_hash;
    let lfu_victim = lfu.record(&single(9), 0).evictions[0].block_hash;
    assert_eq!(lru_victim, hash_of(&single(1)));
    assert_eq!(lfu_victim, hash_of(&single(4)));
}

#[test]
fn test_ttl_expires_on_record_and_purge() {
    let (mut cache, clock) = manager(1, 64, EvictionPolicy::Ttl { ttl_ms: 100 });
    cache.record(&single(1), 0);
    clock.advance_to_ms(50);
    cache.record(&single(2), 0);

    clock.advance_to_ms(120);
    let outcome = cache.record(&single(3), 0);
    assert_eq!(outcome.evictions.len(), 1);
    assert_eq!(outcome.evictions[0].block_hash, hash_of(&single(1)));
    assert_eq!(outcome.evictions[0].reason, EvictionReason::Expired);
    assert!(cache.contains(0, &hash_of(&single(2))));

    clock.advance_to_ms(200);
    let purged = cache.purge_expired();
    assert_eq!(purged.len(), 1);
    assert_eq!(purged[0].block_hash, hash_of(&single(2)));
    assert_eq!(cache.stats().expired_evictions, 2);
    assert!(cache.validate().is_ok());
}

#[test]
fn test_sequence_longer_than_capacity_is_partially_cached() {
    let (mut cache, _) = manager(1, 4, EvictionPolicy::Lru);
    let tokens: Vec<TokenId> = (0..20).collect();

    let outcome = cache.record(&tokens, 0);
    assert_eq!(outcome.inserted_blocks, 4);
    assert_eq!(outcome.skipped_blocks, 1);
    assert!(outcome.evictions.is_empty());

    let overlaps = cache.overlaps(&tokens);
    assert_eq!(overlaps[&0].matched_blocks, 4);
    assert!(cache.validate().is_ok());
}

#[test]
fn test_shared_blocks_are_interned_once() {
    let (mut cache, _) = manager(3, 16, EvictionPolicy::Lru);
    let tokens: Vec<TokenId> = (0..12).collect();
    for worker in 0..3 {
        cache.record(&tokens, worker);
    }

    let stats = cache.stats();
    assert_eq!(stats.unique_blocks, 3);
    assert_eq!(stats.trie_nodes, 3);
    assert_eq!(stats.blocks_per_worker, vec![3, 3, 3]);
    assert!(cache.validate().is_ok());
}

#[test]
fn test_eviction_on_one_worker_keeps_shared_block_for_others() {
    let (mut cache, _) = manager(2, 1, EvictionPolicy::Lru);
    cache.record(&single(1), 0);
    cache.record(&single(1), 1);

    cache.record(&single(2), 0);
    assert!(!cache.contains(0, &hash_of(&single(1))));
    assert!(cache.contains(1, &hash_of(&single(1))));
    assert!(cache.block_table().contains(&hash_of(&single(1))));
    assert!(cache.validate().is_ok());
}

#[test]
fn test_reset_clears_everything() {
    let (mut cache, _) = manager(2, 8, EvictionPolicy::Lfu);
    cache.lookup(&single(1));
    cache.record(&single(1), 0);
    cache.reset();

    let stats = cache.stats();
    assert_eq!(stats.lookups, 0);
    assert_eq!(stats.unique_blocks, 0);
    assert!(cache.trie().is_empty());
    assert!(cache.overlaps(&single(1)).values().all(|o| o.matched_blocks == 0));
}

fn policy() -> impl Strategy<Value = EvictionPolicy> {
    prop_oneof![
        Just(EvictionPolicy::Lru),
        Just(EvictionPolicy::Lfu),
        (1u64..50).prop_map(|ttl_ms| EvictionPolicy::Ttl { ttl_ms }),
    ]
}

proptest! {
    /// No worker ever holds more than its capacity, and the trie, arena
    /// and residency maps stay consistent, under any policy.
    #[test]
    fn capacity_bound_holds(
        eviction in policy(),
        capacity in 1usize..6,
        ops in prop::collection::vec(
            (prop::collection::vec(0u32..3, 0..28), 0u32..3, 0u64..20),
            1..40,
        ),
    ) {
        let (mut cache, clock) = manager(3, capacity, eviction);
        for (tokens, worker, step) in ops {
            clock.advance_by_ms(step);
            cache.record(&tokens, worker);
            if step % 7 == 0 {
                cache.purge_expired();
            }
            for w in 0..3 {
                prop_assert!(cache.worker_block_count(w) <= capacity);
            }
            prop_assert!(cache.validate().is_ok(), "{:?}", cache.validate());
        }
    }

    /// Recording a sequence and looking it up again reports the cached prefix.
    #[test]
    fn record_then_lookup_matches(tokens in prop::collection::vec(0u32..100, 0..64)) {
        let (mut cache, _) = manager(2, 64, EvictionPolicy::Lru);
        let outcome = cache.record(&tokens, 1);
        let overlaps = cache.overlaps(&tokens);

        prop_assert_eq!(overlaps[&1].matched_blocks, outcome.inserted_blocks);
        prop_assert_eq!(overlaps[&1].matched_blocks as usize, tokens.len() / 4);
        prop_assert_eq!(overlaps[&0].matched_blocks, 0);
    }
}
