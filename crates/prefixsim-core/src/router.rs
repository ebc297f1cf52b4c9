//! Smart router: cache-aware worker selection.
//!
//! Each request goes through three phases under one lock: the cache
//! manager reports every worker's overlap (Scoring), the routing algorithm
//! picks a worker (Selected), and the request's blocks are recorded against
//! that worker (Recorded). Registry counters live outside the lock so
//! completions never wait on routing.

use crate::block::{blocks_spanned, TokenId};
use crate::cache::{CacheConfig, CacheManager, CacheStats, EvictionEvent};
use crate::clock::Clock;
use crate::metrics::{MetricsSnapshot, RoutingMetrics};
use crate::registry::{LoadScoreConfig, WorkerRegistry};
use parking_lot::Mutex;
use prefixsim_algorithms::{
    CostBreakdown, CostWeights, KvAware, RequestInfo, RoutingAlgorithm, Selection, WorkerId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("no workers available")]
    NoWorkersAvailable,
    #[error("unknown worker {0}")]
    UnknownWorker(WorkerId),
}

/// Everything the router needs at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    pub cache: CacheConfig,
    pub weights: CostWeights,
    pub load: LoadScoreConfig,
    /// Decisions kept in the metrics sliding window.
    pub metrics_window: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            weights: CostWeights::default(),
            load: LoadScoreConfig::default(),
            metrics_window: 1024,
        }
    }
}

/// Outcome of routing one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub request_id: u64,
    pub worker_id: WorkerId,
    /// Cached prefix on the chosen worker, before this request was recorded.
    pub matched_blocks: u32,
    pub matched_tokens: u32,
    pub cache_hit_tokens: u32,
    pub cache_miss_tokens: u32,
    pub cost: CostBreakdown,
    /// Blocks newly recorded on the chosen worker.
    pub inserted_blocks: u32,
    /// Blocks evicted while serving this request, on any worker.
    pub evicted_blocks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Per-worker view combining registry counters and cache residency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub id: WorkerId,
    pub active_requests: u32,
    pub queue_depth: u32,
    pub load_score: f64,
    pub cached_blocks: usize,
    pub capacity_blocks: usize,
    pub total_routed: u64,
    pub completed: u64,
}

#[derive(Debug, Clone, Copy)]
enum RoutePhase {
    Scoring,
    Selected,
    Recorded,
}

struct RouterState {
    cache: CacheManager,
    algorithm: Box<dyn RoutingAlgorithm>,
}

/// Routes tokenized requests to workers. Shareable across threads.
pub struct SmartRouter {
    state: Mutex<RouterState>,
    registry: Arc<WorkerRegistry>,
    metrics: Arc<RoutingMetrics>,
    config: RouterConfig,
}

impl std::fmt::Debug for SmartRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartRouter")
            .field("workers", &self.registry.len())
            .field("config", &self.config)
            .finish()
    }
}

impl SmartRouter {
    /// Router using the cost-based `kv_aware` algorithm with the configured weights.
    pub fn new(num_workers: usize, config: RouterConfig, clock: Arc<dyn Clock>) -> Self {
        let algorithm = Box::new(KvAware::with_weights(config.weights));
        Self::with_algorithm(num_workers, config, algorithm, clock)
    }

    pub fn with_algorithm(
        num_workers: usize,
        config: RouterConfig,
        algorithm: Box<dyn RoutingAlgorithm>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: Mutex::new(RouterState {
                cache: CacheManager::new(num_workers, config.cache, clock),
                algorithm,
            }),
            registry: Arc::new(WorkerRegistry::new(num_workers, config.load)),
            metrics: Arc::new(RoutingMetrics::new(num_workers, config.metrics_window)),
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn num_workers(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn metrics_handle(&self) -> &Arc<RoutingMetrics> {
        &self.metrics
    }

    pub fn algorithm_name(&self) -> String {
        self.state.lock().algorithm.name().to_string()
    }

    pub fn custom_metrics(&self) -> HashMap<String, f64> {
        self.state.lock().algorithm.custom_metrics()
    }

    pub fn route(
        &self,
        tokens: &[TokenId],
        request_id: u64,
    ) -> Result<RoutingDecision, RouterError> {
        self.route_labeled(tokens, request_id, None)
    }

    /// Route a request, attributing it to `endpoint` in the metrics.
    pub fn route_labeled(
        &self,
        tokens: &[TokenId],
        request_id: u64,
        endpoint: Option<&str>,
    ) -> Result<RoutingDecision, RouterError> {
        if self.registry.is_empty() {
            return Err(RouterError::NoWorkersAvailable);
        }

        let mut state = self.state.lock();
        let RouterState { cache, algorithm } = &mut *state;

        let mut evictions: Vec<EvictionEvent> = cache.purge_expired();

        trace!(request_id, phase = ?RoutePhase::Scoring, tokens = tokens.len());
        let overlaps = cache.lookup(tokens);
        let capacity = cache.config().capacity_blocks;

        let mut workers = self.registry.snapshot();
        for worker in &mut workers {
            worker.cached_blocks = cache.worker_block_count(worker.id);
            worker.capacity_blocks = capacity;
            worker.overlap_blocks = overlaps
                .get(&worker.id)
                .map(|o| o.matched_blocks)
                .unwrap_or(0);
        }

        let request = RequestInfo {
            id: request_id,
            num_tokens: tokens.len() as u32,
            request_blocks: blocks_spanned(tokens.len(), cache.config().block_size as usize),
        };

        let (worker_id, cost) = match algorithm.select(&request, &workers) {
            Selection::Worker { worker_id, cost } => (worker_id, cost),
            Selection::NoWorkers => {
                self.metrics.observe_evictions(&evictions);
                return Err(RouterError::NoWorkersAvailable);
            }
        };
        if !self.registry.contains(worker_id) {
            warn!(request_id, worker_id, "algorithm selected an unknown worker");
            self.metrics.observe_evictions(&evictions);
            return Err(RouterError::UnknownWorker(worker_id));
        }
        trace!(request_id, phase = ?RoutePhase::Selected, worker_id, cost = cost.total);

        let overlap = overlaps.get(&worker_id).copied().unwrap_or_default();
        let outcome = cache.record(tokens, worker_id);
        evictions.extend(outcome.evictions);
        self.registry.increment(worker_id);
        trace!(request_id, phase = ?RoutePhase::Recorded, inserted = outcome.inserted_blocks);

        let hit_tokens = overlap.matched_tokens.min(tokens.len() as u32);
        let decision = RoutingDecision {
            request_id,
            worker_id,
            matched_blocks: overlap.matched_blocks,
            matched_tokens: overlap.matched_tokens,
            cache_hit_tokens: hit_tokens,
            cache_miss_tokens: tokens.len() as u32 - hit_tokens,
            cost,
            inserted_blocks: outcome.inserted_blocks,
            evicted_blocks: evictions.len() as u32,
            endpoint: endpoint.map(str::to_string),
        };

        debug!(
            request_id,
            worker_id,
            matched_blocks = decision.matched_blocks,
            hit_tokens = decision.cache_hit_tokens,
            cost = cost.total,
            evicted = decision.evicted_blocks,
            "routed request"
        );

        self.metrics.observe(&decision, &evictions);
        Ok(decision)
    }

    /// Completion signal for one request on `worker_id`. Does not take the cache lock.
    pub fn complete(&self, worker_id: WorkerId) -> Result<(), RouterError> {
        if self.registry.decrement(worker_id) {
            Ok(())
        } else {
            warn!(worker_id, "completion for unknown worker");
            Err(RouterError::UnknownWorker(worker_id))
        }
    }

    pub fn set_queue_depth(&self, worker_id: WorkerId, depth: u32) -> Result<(), RouterError> {
        if self.registry.set_queue_depth(worker_id, depth) {
            Ok(())
        } else {
            Err(RouterError::UnknownWorker(worker_id))
        }
    }

    /// Cached prefix of `tokens` on `worker_id` without recording anything.
    pub fn peek_overlap(&self, tokens: &[TokenId], worker_id: WorkerId) -> Option<u32> {
        let state = self.state.lock();
        state
            .cache
            .overlaps(tokens)
            .get(&worker_id)
            .map(|o| o.matched_tokens)
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().cache.stats()
    }

    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        let state = self.state.lock();
        let capacity = state.cache.config().capacity_blocks;
        self.registry
            .counters()
            .into_iter()
            .map(|c| WorkerStats {
                id: c.id,
                active_requests: c.active_requests,
                queue_depth: c.queue_depth,
                load_score: c.load_score,
                cached_blocks: state.cache.worker_block_count(c.id),
                capacity_blocks: capacity,
                total_routed: c.total_routed,
                completed: c.completed,
            })
            .collect()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Check cache invariants.
    pub fn validate(&self) -> Result<(), String> {
        self.state.lock().cache.validate()
    }

    /// Clear cache, counters, metrics and algorithm state between runs.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.cache.reset();
        state.algorithm.reset();
        self.registry.reset();
        self.metrics.reset();
    }
}
