//! KV-overlap-aware routing algorithm.
//!
//! Routes each request to the worker with the lowest combined cost of
//! prefill work, decode work and current load. Blocks already cached on a
//! worker do not need prefill there, so overlap lowers that worker's cost.
//! This is the scoring used by prefix-cache-aware routers such as Dynamo's
//! KV router and SGLang's cache-aware policy.

use crate::traits::*;
use std::collections::HashMap;

/// Cost-based router.
///
/// Strategy:
/// 1. For each worker, `prefill_blocks = request_blocks - overlap_blocks`.
/// 2. `cost = kv_overlap_weight * prefill_blocks + decode_blocks
///    + load_balance_weight * active_requests`.
/// 3. Route to the minimum cost; ties go to the lowest worker id.
pub struct KvAware {
    weights: CostWeights,
    /// Requests routed to a worker that had at least one block cached.
    affinity_hits: u64,
    routed: u64,
}

impl KvAware {
    pub fn new() -> Self {
        Self::with_weights(CostWeights::default())
    }

    pub fn with_weights(weights: CostWeights) -> Self {
        Self {
            weights,
            affinity_hits: 0,
            routed: 0,
        }
    }

    pub fn weights(&self) -> &CostWeights {
        &self.weights
    }
}

impl Default for KvAware {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingAlgorithm for KvAware {
    fn select(&mut self, request: &RequestInfo, workers: &[WorkerSnapshot]) -> Selection {
        let best = min_cost(
            workers
                .iter()
                .map(|w| (w.id, CostBreakdown::compute(&self.weights, request, w))),
        );

        let Some((worker_id, cost)) = best else {
            return Selection::NoWorkers;
        };

        self.routed += 1;
        if workers
            .iter()
            .any(|w| w.id == worker_id && w.overlap_blocks > 0)
        {
            self.affinity_hits += 1;
        }

        Selection::Worker { worker_id, cost }
    }

    fn name(&self) -> &str {
        "kv_aware"
    }

    fn custom_metrics(&self) -> HashMap<String, f64> {
        let mut metrics = HashMap::new();
        let ratio = if self.routed == 0 {
            0.0
        } else {
            self.affinity_hits as f64 / self.routed as f64
        };
        metrics.insert("affinity_route_ratio".to_string(), ratio);
        metrics
    }

    fn reset(&mut self) {
        self.affinity_hits = 0;
        self.routed = 0;
    }
}
