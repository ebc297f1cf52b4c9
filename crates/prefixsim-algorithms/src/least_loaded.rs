//! Least-loaded routing algorithm.
//!
//! Routes each request to the worker with the lowest load score, ignoring
//! cache contents entirely. Used as the cache-oblivious baseline.

use crate::traits::*;

/// Least-loaded router.
pub struct LeastLoaded {
    /// Only used to report a comparable cost breakdown.
    weights: CostWeights,
}

impl LeastLoaded {
    pub fn new() -> Self {
        Self::with_weights(CostWeights::default())
    }

    pub fn with_weights(weights: CostWeights) -> Self {
        Self { weights }
    }
}

impl Default for LeastLoaded {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingAlgorithm for LeastLoaded {
    fn select(&mut self, request: &RequestInfo, workers: &[WorkerSnapshot]) -> Selection {
        let best = workers.iter().min_by(|a, b| {
            a.load_score
                .total_cmp(&b.load_score)
                .then(a.id.cmp(&b.id))
        });

        match best {
            Some(worker) => Selection::Worker {
                worker_id: worker.id,
                cost: CostBreakdown::compute(&self.weights, request, worker),
            },
            None => Selection::NoWorkers,
        }
    }

    fn name(&self) -> &str {
        "least_loaded"
    }
}
