/// Integration tests for the smart router.
use prefixsim_algorithms::{CostWeights, LeastLoaded, RoundRobin};
use prefixsim_core::block::TokenId;
use prefixsim_core::cache::CacheConfig;
use prefixsim_core::clock::SimClock;
use prefixsim_core::eviction::EvictionPolicy;
use prefixsim_core::router::{RouterConfig, RouterError, SmartRouter};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

fn config(capacity: usize, weights: CostWeights) -> RouterConfig {
    RouterConfig {
        cache: CacheConfig {
            block_size: 4,
            capacity_blocks: capacity,
            eviction: EvictionPolicy::Lru,
        },
        weights,
        ..Default::default()
    }
}

fn router(workers: usize) -> SmartRouter {
    SmartRouter::new(workers, config(64, CostWeights::default()), Arc::new(SimClock::new()))
}

#[test]
fn test_shared_prefix_routes_to_warm_worker() {
    let router = router(2);
    let a: Vec<TokenId> = (1..=12).collect();
    let mut b: Vec<TokenId> = a[..8].to_vec();
    b.extend([90, 91, 92, 93]);

    let first = router.route(&a, 1).unwrap();
    assert_eq!(first.worker_id, 0);
    assert_eq!(first.cache_hit_tokens, 0);
    assert_eq!(router.worker_stats()[0].cached_blocks, 3);

    let second = router.route(&b, 2).unwrap();
    assert_eq!(second.worker_id, 0);
    assert_eq!(second.matched_blocks, 2);
    assert_eq!(second.cache_hit_tokens, 8);
    assert_eq!(second.cache_miss_tokens, 4);

    // Worker 0: 1 prefill + 1 decode + 1 active. Worker 1: 3 prefill + 1 decode.
    assert_eq!(second.cost.total, 3.0);
    assert!(second.cost.total < 4.0);
    assert_eq!(router.peek_overlap(&b, 1), Some(0));
    assert!(router.validate().is_ok());
}

#[test]
fn test_zero_overlap_weight_ignores_cache() {
    let weights = CostWeights {
        kv_overlap_weight: 0.0,
        ..Default::default()
    };
    let router = SmartRouter::new(2, config(64, weights), Arc::new(SimClock::new()));
    let tokens: Vec<TokenId> = (0..16).collect();

    assert_eq!(router.route(&tokens, 1).unwrap().worker_id, 0);
    // Worker 0 has the whole prompt cached but is busier.
    let second = router.route(&tokens, 2).unwrap();
    assert_eq!(second.worker_id, 1);
    assert_eq!(second.cache_hit_tokens, 0);
}

#[test]
fn test_ties_go_to_lowest_worker_id() {
    let run = || {
        let router = router(4);
        (0..8)
            .map(|i| {
                let decision = router.route(&[i, i, i, i], i as u64).unwrap();
                router.complete(decision.worker_id).unwrap();
                decision.worker_id
            })
            .collect::<Vec<_>>()
    };

    // Every worker is idle and cold for every request.
    let first = run();
    assert!(first.iter().all(|&w| w == 0));
    assert_eq!(first, run());
}

#[test]
fn test_queue_depth_only_moves_least_loaded() {
    // The cost function weighs active requests, not queue depth.
    let router = router(2);
    router.set_queue_depth(0, 4).unwrap();
    assert_eq!(router.route(&[1, 2, 3, 4], 1).unwrap().worker_id, 0);

    let baseline = SmartRouter::with_algorithm(
        2,
        config(64, CostWeights::default()),
        Box::new(LeastLoaded::new()),
        Arc::new(SimClock::new()),
    );
    baseline.set_queue_depth(0, 4).unwrap();
    assert_eq!(baseline.route(&[1, 2, 3, 4], 1).unwrap().worker_id, 1);
    assert_eq!(
        router.set_queue_depth(5, 1),
        Err(RouterError::UnknownWorker(5))
    );
}

#[test]
fn test_no_workers_available() {
    let router = router(0);
    assert_eq!(
        router.route(&[1, 2, 3, 4], 1),
        Err(RouterError::NoWorkersAvailable)
    );
    assert_eq!(router.metrics().total_requests, 0);
}

#[test]
fn test_lru_eviction_through_router() {
    let router = SmartRouter::new(1, config(4, CostWeights::default()), Arc::new(SimClock::new()));
    let seqs: Vec<Vec<TokenId>> = (1..=5).map(|t| vec![t; 4]).collect();

    let mut evicted = 0;
    for (i, seq) in seqs.iter().enumerate() {
        evicted += router.route(seq, i as u64).unwrap().evicted_blocks;
    }

    assert_eq!(evicted, 1);
    assert_eq!(router.peek_overlap(&seqs[0], 0), Some(0));
    for seq in &seqs[1..] {
        assert_eq!(router.peek_overlap(seq, 0), Some(4));
    }
    assert_eq!(router.metrics().total_evictions, 1);
}

#[test]
fn test_custom_algorithm() {
    let router = SmartRouter::with_algorithm(
        3,
        RouterConfig::default(),
        Box::new(RoundRobin::new()),
        Arc::new(SimClock::new()),
    );
    let workers: Vec<u32> = (0..6)
        .map(|i| router.route(&[1, 2, 3], i).unwrap().worker_id)
        .collect();
    assert_eq!(workers, vec![0, 1, 2, 0, 1, 2]);
    assert_eq!(router.algorithm_name(), "round_robin");
}

#[test]
fn test_concurrent_routing() {
    let router = Arc::new(SmartRouter::new(
        4,
        config(32, CostWeights::default()),
        Arc::new(SimClock::new()),
    ));
    let system: Vec<TokenId> = (0..32).collect();

    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let router = Arc::clone(&router);
            let system = system.clone();
            thread::spawn(move || {
                for i in 0..50u32 {
                    let mut tokens = system.clone();
                    tokens.extend([t, i, t + i, 7]);
                    let decision = router.route(&tokens, (t * 100 + i) as u64).unwrap();
                    router.complete(decision.worker_id).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(router.validate().is_ok(), "{:?}", router.validate());
    assert_eq!(router.metrics().total_requests, 200);
    let stats = router.worker_stats();
    assert!(stats.iter().all(|w| w.active_requests == 0));
    assert_eq!(stats.iter().map(|w| w.total_routed).sum::<u64>(), 200);
    assert!(stats.iter().all(|w| w.cached_blocks <= 32));
}

#[test]
fn test_metrics_track_cached_blocks_per_worker() {
    let clock = Arc::new(SimClock::new());
    let mut cfg = config(6, CostWeights::default());
    cfg.cache.eviction = EvictionPolicy::Ttl { ttl_ms: 40 };
    let router = SmartRouter::new(3, cfg, clock.clone());

    for i in 0..60u32 {
        clock.advance_by_ms(7);
        let tokens: Vec<TokenId> = (0..(i % 5 + 1) * 4).map(|t| t + i % 3).collect();
        let decision = router.route(&tokens, i as u64).unwrap();
        if i % 2 == 0 {
            router.complete(decision.worker_id).unwrap();
        }
    }

    let cached: Vec<usize> = router
        .metrics()
        .per_worker
        .iter()
        .map(|w| w.cached_blocks as usize)
        .collect();
    assert_eq!(cached, router.stats().blocks_per_worker);
    assert!(router.metrics().total_evictions > 0);
}

proptest! {
    /// With no weight on cache overlap, the router picks the worker with
    /// the fewest active requests, lowest id first, whatever is cached where
    /// and whatever queue depths are reported.
    #[test]
    fn zero_overlap_weight_is_pure_load_balancing(
        ops in prop::collection::vec(
            (
                prop::collection::vec(0u32..4, 0..24),
                prop::option::of(0u32..3),
                prop::option::of((0u32..3, 0u32..16)),
            ),
            1..40,
        ),
    ) {
        let weights = CostWeights {
            kv_overlap_weight: 0.0,
            ..Default::default()
        };
        let router = SmartRouter::new(3, config(8, weights), Arc::new(SimClock::new()));

        for (i, (tokens, complete, queue)) in ops.into_iter().enumerate() {
            if let Some(worker) = complete {
                let _ = router.complete(worker);
            }
            if let Some((worker, depth)) = queue {
                router.set_queue_depth(worker, depth).unwrap();
            }
            let expected = router
                .worker_stats()
                .iter()
                .min_by(|a, b| a.active_requests.cmp(&b.active_requests).then(a.id.cmp(&b.id)))
                .map(|w| w.id)
                .unwrap();
            let decision = router.route(&tokens, i as u64).unwrap();
            prop_assert_eq!(decision.worker_id, expected);
        }
    }
}
