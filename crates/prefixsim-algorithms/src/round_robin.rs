//! Round-robin routing algorithm.
//!
//! Distributes requests evenly across workers in a circular fashion.
//! Ignores both load and cache contents, so it gives the hit-rate floor
//! that cache-aware routing is measured against.

use crate::traits::*;

/// Round-robin router.
///
/// Tracks the last-used worker by id rather than positional index, so the
/// rotation stays stable if the snapshot list is ever filtered.
pub struct RoundRobin {
    /// Id of the last worker we routed to (None on first call).
    last_worker_id: Option<WorkerId>,
    weights: CostWeights,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::with_weights(CostWeights::default())
    }

    pub fn with_weights(weights: CostWeights) -> Self {
        Self {
            last_worker_id: None,
            weights,
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingAlgorithm for RoundRobin {
    fn select(&mut self, request: &RequestInfo, workers: &[WorkerSnapshot]) -> Selection {
        // First worker with id > last, wrapping around to the first.
        let chosen = match self.last_worker_id {
            Some(last_id) => workers
                .iter()
                .find(|w| w.id > last_id)
                .or_else(|| workers.first()),
            None => workers.first(),
        };

        let Some(worker) = chosen else {
            return Selection::NoWorkers;
        };

        self.last_worker_id = Some(worker.id);
        Selection::Worker {
            worker_id: worker.id,
            cost: CostBreakdown::compute(&self.weights, request, worker),
        }
    }

    fn name(&self) -> &str {
        "round_robin"
    }

    fn reset(&mut self) {
        self.last_worker_id = None;
    }
}
