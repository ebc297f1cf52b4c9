//! Routing algorithm trait definitions.
//!
//! All routing algorithms implement the [`RoutingAlgorithm`] trait, which
//! receives the request's block footprint plus one [`WorkerSnapshot`] per
//! worker (carrying that worker's cache overlap for this request) and
//! returns a [`Selection`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of a simulated worker. Workers are numbered `0..n`.
pub type WorkerId = u32;

/// Read-only view of a worker, provided to routing algorithms.
///
/// This is the algorithms crate's view of a worker: the registry counters
/// and the cache overlap for the request being scored, not the cache itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub active_requests: u32,
    pub queue_depth: u32,
    /// Load score as derived by the worker registry.
    pub load_score: f64,
    pub cached_blocks: usize,
    pub capacity_blocks: usize,
    /// Blocks of this request already resident on the worker.
    pub overlap_blocks: u32,
}

/// Information about an incoming request, provided to routing algorithms.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub id: u64,
    pub num_tokens: u32,
    /// Blocks the request occupies, counting a trailing partial block.
    pub request_blocks: u32,
}

/// Knobs of the routing cost function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostWeights {
    /// Weight on blocks that still need prefill. Zero means pure load balancing.
    pub kv_overlap_weight: f64,
    /// Weight on the worker's active request count.
    pub load_balance_weight: f64,
    /// Fixed per-request decode cost, in blocks.
    pub decode_blocks: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            kv_overlap_weight: 1.0,
            load_balance_weight: 1.0,
            decode_blocks: 1.0,
        }
    }
}

/// The terms that make up a worker's routing cost.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Prefill credit earned from cached blocks, already subtracted from `prefill`.
    pub overlap: f64,
    /// Weighted count of blocks that still need prefill.
    pub prefill: f64,
    pub decode: f64,
    pub load: f64,
    pub total: f64,
}

impl CostBreakdown {
    /// `kv_overlap_weight * prefill_blocks + decode_blocks + load_balance_weight * active_requests`
    ///
    /// Queue depth is not part of the cost; only the `least_loaded` baseline reads it.
    pub fn compute(weights: &CostWeights, request: &RequestInfo, worker: &WorkerSnapshot) -> Self {
        let overlap_blocks = worker.overlap_blocks.min(request.request_blocks);
        let prefill_blocks = request.request_blocks - overlap_blocks;

        let overlap = weights.kv_overlap_weight * overlap_blocks as f64;
        let prefill = weights.kv_overlap_weight * prefill_blocks as f64;
        let decode = weights.decode_blocks;
        let load = weights.load_balance_weight * worker.active_requests as f64;

        Self {
            overlap,
            prefill,
            decode,
            load,
            total: prefill + decode + load,
        }
    }
}

/// Outcome of scoring a request.
#[derive(Debug, Clone)]
pub enum Selection {
    /// Route to this worker; `cost` is the winning breakdown.
    Worker {
        worker_id: WorkerId,
        cost: CostBreakdown,
    },
    /// The worker list was empty.
    NoWorkers,
}

impl Selection {
    pub fn worker_id(&self) -> Option<WorkerId> {
        match self {
            Selection::Worker { worker_id, .. } => Some(*worker_id),
            Selection::NoWorkers => None,
        }
    }
}

/// The core routing algorithm trait.
///
/// The smart router calls [`select`](RoutingAlgorithm::select) once per
/// request while holding the cache lock, so implementations must not block.
pub trait RoutingAlgorithm: Send + Sync {
    /// Pick a worker for `request` given a snapshot of every worker.
    fn select(&mut self, request: &RequestInfo, workers: &[WorkerSnapshot]) -> Selection;

    /// Human-readable name for reports.
    fn name(&self) -> &str;

    /// Optional: algorithm-specific metrics to include in output.
    fn custom_metrics(&self) -> HashMap<String, f64> {
        HashMap::new()
    }

    /// Forget any internal state between benchmark runs.
    fn reset(&mut self) {}
}

/// Lowest total cost, ties broken by lowest worker id.
pub fn min_cost<I>(costs: I) -> Option<(WorkerId, CostBreakdown)>
where
    I: IntoIterator<Item = (WorkerId, CostBreakdown)>,
{
    costs
        .into_iter()
        .min_by(|(id_a, a), (id_b, b)| a.total.total_cmp(&b.total).then(id_a.cmp(id_b)))
}
