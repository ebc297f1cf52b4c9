/// Integration tests for the prefix trie.
use prefixsim_core::block::{chunk_tokens, TokenId};
use prefixsim_core::trie::PrefixTrie;
use proptest::prelude::*;

const BLOCK_SIZE: usize = 4;

fn blocks(tokens: &[TokenId]) -> Vec<prefixsim_core::TokenBlock> {
    chunk_tokens(tokens, BLOCK_SIZE)
}

#[test]
fn test_shared_system_prompt_across_workers() {
    let mut trie = PrefixTrie::new(BLOCK_SIZE as u32);
    let system: Vec<TokenId> = (0..16).collect();

    let mut a = system.clone();
    a.extend([100, 101, 102, 103]);
    let mut b = system.clone();
    b.extend([200, 201, 202, 203, 204, 205, 206, 207]);

    trie.insert(&blocks(&a), 0);
    trie.insert(&blocks(&b), 1);

    // Four shared nodes, one tail for a, two for b.
    assert_eq!(trie.node_count(), 7);

    let matches = trie.find_matches(&blocks(&b));
    assert_eq!(matches[&0].matched_blocks, 4);
    assert_eq!(matches[&0].matched_tokens, 16);
    assert_eq!(matches[&1].matched_blocks, 6);
    assert!(trie.validate().is_ok());
}

#[test]
fn test_divergent_first_block_matches_nothing() {
    let mut trie = PrefixTrie::new(BLOCK_SIZE as u32);
    trie.insert(&blocks(&[1, 2, 3, 4, 5, 6, 7, 8]), 0);

    // Same second block, different first block.
    let matches = trie.find_matches(&blocks(&[9, 9, 9, 9, 5, 6, 7, 8]));
    assert!(matches.is_empty());
}

#[test]
fn test_remove_worker_prunes_only_its_nodes() {
    let mut trie = PrefixTrie::new(BLOCK_SIZE as u32);
    let shared: Vec<TokenId> = (0..8).collect();
    let mut own: Vec<TokenId> = shared.clone();
    own.extend([50, 51, 52, 53]);

    trie.insert(&blocks(&shared), 0);
    trie.insert(&blocks(&own), 1);
    assert_eq!(trie.node_count(), 3);

    let removal = trie.remove_worker(1);
    assert_eq!(removal.removed.len(), 3);
    assert_eq!(removal.pruned.len(), 1);
    assert_eq!(trie.node_count(), 2);
    assert_eq!(trie.worker_node_count(1), 0);
    assert_eq!(trie.worker_node_count(0), 2);
    assert!(trie.validate().is_ok());
}

#[test]
fn test_remove_from_depth_keeps_head() {
    let mut trie = PrefixTrie::new(BLOCK_SIZE as u32);
    let tokens: Vec<TokenId> = (0..16).collect();
    let path = blocks(&tokens);
    trie.insert(&path, 0);

    trie.remove(0, &path, 2);
    assert_eq!(trie.held_prefix(0, &path), 2);
    assert_eq!(trie.node_count(), 2);
    assert!(trie.validate().is_ok());
}

fn token_seqs() -> impl Strategy<Value = Vec<Vec<TokenId>>> {
    // Small alphabet so sequences collide on prefixes often.
    prop::collection::vec(prop::collection::vec(0u32..4, 0..24), 1..12)
}

proptest! {
    /// A worker that matches `k` blocks of a query matches the first
    /// `min(k, n)` blocks of any `n`-block prefix of that query.
    #[test]
    fn match_is_monotonic_in_query_length(
        seqs in token_seqs(),
        workers in prop::collection::vec(0u32..3, 12),
        cut in 0usize..24,
    ) {
        let mut trie = PrefixTrie::new(BLOCK_SIZE as u32);
        for (seq, worker) in seqs.iter().zip(workers.iter()) {
            trie.insert(&blocks(seq), *worker);
        }

        let query = &seqs[0];
        let cut = cut.min(query.len());
        let full = trie.find_matches(&blocks(query));
        let head_blocks = blocks(&query[..cut]).len() as u32;
        let head = trie.find_matches(&blocks(&query[..cut]));

        for (worker, overlap) in &full {
            let shorter = head.get(worker).map(|o| o.matched_blocks).unwrap_or(0);
            prop_assert!(
                shorter >= overlap.matched_blocks.min(head_blocks),
                "worker {} matched {} of the full query but {} of its head",
                worker, overlap.matched_blocks, shorter
            );
        }
        for overlap in full.values() {
            prop_assert!(overlap.matched_tokens as usize <= query.len());
            prop_assert_eq!(overlap.matched_tokens, overlap.matched_blocks * BLOCK_SIZE as u32);
        }
    }

    /// Any sequence of inserts and removals leaves a structurally valid trie.
    #[test]
    fn insert_and_remove_keep_invariants(
        seqs in token_seqs(),
        workers in prop::collection::vec(0u32..3, 12),
        removals in prop::collection::vec((0usize..12, 0u32..3, 0usize..6), 0..8),
    ) {
        let mut trie = PrefixTrie::new(BLOCK_SIZE as u32);
        for (seq, worker) in seqs.iter().zip(workers.iter()) {
            trie.insert(&blocks(seq), *worker);
        }
        for (idx, worker, depth) in removals {
            let seq = &seqs[idx % seqs.len()];
            trie.remove(worker, &blocks(seq), depth);
            prop_assert!(trie.validate().is_ok(), "{:?}", trie.validate());
        }
        prop_assert!(trie.validate().is_ok(), "{:?}", trie.validate());
    }

    /// Inserting a path the worker already holds adds nothing.
    #[test]
    fn insert_is_idempotent(seq in prop::collection::vec(0u32..8, 0..32), worker in 0u32..4) {
        let mut trie = PrefixTrie::new(BLOCK_SIZE as u32);
        let path = blocks(&seq);
        let first = trie.insert(&path, worker);
        prop_assert_eq!(first.len(), path.len());

        let nodes = trie.node_count();
        let second = trie.insert(&path, worker);
        prop_assert!(second.is_empty());
        prop_assert_eq!(trie.node_count(), nodes);
        prop_assert_eq!(trie.held_prefix(worker, &path), path.len());
    }
}
