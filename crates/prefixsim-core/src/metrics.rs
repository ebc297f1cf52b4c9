//! Routing and cache metrics.
//!
//! [`RoutingMetrics`] observes routing decisions and eviction events and
//! derives hit rates, per-worker and per-endpoint statistics, the
//! matched-prefix distribution and load fairness. It never touches cache
//! state. [`BenchmarkReport`] bundles a run's metrics for output.

use crate::cache::{CacheStats, EvictionEvent};
use crate::router::{RoutingDecision, WorkerStats};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Percentile values for a distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl Percentiles {
    /// Compute percentiles from a slice of values.
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                p50: 0.0,
                p75: 0.0,
                p90: 0.0,
                p95: 0.0,
                p99: 0.0,
                min: 0.0,
                max: 0.0,
                mean: 0.0,
            };
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;

        Self {
            p50: percentile_sorted(&sorted, 50.0),
            p75: percentile_sorted(&sorted, 75.0),
            p90: percentile_sorted(&sorted, 90.0),
            p95: percentile_sorted(&sorted, 95.0),
            p99: percentile_sorted(&sorted, 99.0),
            min: sorted[0],
            max: sorted[n - 1],
            mean,
        }
    }
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    pub worker_id: u32,
    pub routed: u64,
    pub hit_tokens: u64,
    pub evictions: u64,
    /// Blocks inserted on this worker minus blocks evicted from it.
    pub cached_blocks: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub requests: u64,
    pub tokens: u64,
    pub hit_tokens: u64,
}

impl EndpointMetrics {
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hit_tokens, self.tokens)
    }
}

/// Point-in-time view of everything [`RoutingMetrics`] has observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub hit_tokens: u64,
    pub miss_tokens: u64,
    /// Decisions currently in the sliding window.
    pub window_len: usize,
    /// Hit tokens over tokens for the last `window_len` decisions.
    pub window_hit_rate: f64,
    /// Hit tokens over tokens since the last reset.
    pub token_reuse_rate: f64,
    /// Share of requests with at least one hit token.
    pub request_hit_rate: f64,
    pub total_evictions: u64,
    pub per_worker: Vec<WorkerMetrics>,
    pub per_endpoint: BTreeMap<String, EndpointMetrics>,
    /// Matched prefix length in blocks -> number of decisions.
    pub prefix_blocks_histogram: BTreeMap<u32, u64>,
    /// Matched prefix length in tokens over the sliding window.
    pub prefix_tokens: Percentiles,
    pub load_cv: f64,
    pub jains_fairness_index: f64,
}

impl Default for Percentiles {
    fn default() -> Self {
        Self::from_values(&[])
    }
}

/// One decision as remembered by the sliding window.
#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    tokens: u64,
    hits: u64,
    matched_tokens: u32,
}

#[derive(Debug, Default)]
struct MetricsState {
    window: VecDeque<WindowEntry>,
    window_tokens: u64,
    window_hits: u64,
    total_requests: u64,
    requests_with_hits: u64,
    total_tokens: u64,
    hit_tokens: u64,
    total_evictions: u64,
    per_worker: Vec<WorkerMetrics>,
    per_endpoint: BTreeMap<String, EndpointMetrics>,
    prefix_blocks: BTreeMap<u32, u64>,
}

/// Observer of routing decisions. Owns no cache state.
#[derive(Debug)]
pub struct RoutingMetrics {
    window: usize,
    num_workers: usize,
    state: Mutex<MetricsState>,
}

impl RoutingMetrics {
    pub fn new(num_workers: usize, window: usize) -> Self {
        Self {
            window: window.max(1),
            num_workers,
            state: Mutex::new(Self::fresh_state(num_workers)),
        }
    }

    fn fresh_state(num_workers: usize) -> MetricsState {
        MetricsState {
            per_worker: (0..num_workers as u32)
                .map(|worker_id| WorkerMetrics {
                    worker_id,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn window_size(&self) -> usize {
        self.window
    }

    /// Fold one decision and the evictions it caused into the metrics.
    pub fn observe(&self, decision: &RoutingDecision, evictions: &[EvictionEvent]) {
        let tokens = (decision.cache_hit_tokens + decision.cache_miss_tokens) as u64;
        let hits = decision.cache_hit_tokens as u64;

        let mut state = self.state.lock();
        state.total_requests += 1;
        state.total_tokens += tokens;
        state.hit_tokens += hits;
        if hits > 0 {
            state.requests_with_hits += 1;
        }

        state.window.push_back(WindowEntry {
            tokens,
            hits,
            matched_tokens: decision.matched_tokens,
        });
        state.window_tokens += tokens;
        state.window_hits += hits;
        while state.window.len() > self.window {
            if let Some(old) = state.window.pop_front() {
                state.window_tokens -= old.tokens;
                state.window_hits -= old.hits;
            }
        }

        if let Some(worker) = state.per_worker.get_mut(decision.worker_id as usize) {
            worker.routed += 1;
            worker.hit_tokens += hits;
            worker.cached_blocks += decision.inserted_blocks as u64;
        }

        if let Some(endpoint) = &decision.endpoint {
            let entry = state.per_endpoint.entry(endpoint.clone()).or_default();
            entry.requests += 1;
            entry.tokens += tokens;
            entry.hit_tokens += hits;
        }

        *state.prefix_blocks.entry(decision.matched_blocks).or_insert(0) += 1;

        Self::count_evictions(&mut state, evictions);
    }

    /// Evictions that happened outside a routing decision.
    pub fn observe_evictions(&self, evictions: &[EvictionEvent]) {
        let mut state = self.state.lock();
        Self::count_evictions(&mut state, evictions);
    }

    fn count_evictions(state: &mut MetricsState, evictions: &[EvictionEvent]) {
        state.total_evictions += evictions.len() as u64;
        for event in evictions {
            if let Some(worker) = state.per_worker.get_mut(event.worker_id as usize) {
                worker.evictions += 1;
                worker.cached_blocks = worker.cached_blocks.saturating_sub(1);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        let routed: Vec<u64> = state.per_worker.iter().map(|w| w.routed).collect();
        let window_prefixes: Vec<f64> = state
            .window
            .iter()
            .map(|e| e.matched_tokens as f64)
            .collect();

        MetricsSnapshot {
            total_requests: state.total_requests,
            total_tokens: state.total_tokens,
            hit_tokens: state.hit_tokens,
            miss_tokens: state.total_tokens - state.hit_tokens,
            window_len: state.window.len(),
            window_hit_rate: ratio(state.window_hits, state.window_tokens),
            token_reuse_rate: ratio(state.hit_tokens, state.total_tokens),
            request_hit_rate: ratio(state.requests_with_hits, state.total_requests),
            total_evictions: state.total_evictions,
            per_worker: state.per_worker.clone(),
            per_endpoint: state.per_endpoint.clone(),
            prefix_blocks_histogram: state.prefix_blocks.clone(),
            prefix_tokens: Percentiles::from_values(&window_prefixes),
            load_cv: coefficient_of_variation(&routed),
            jains_fairness_index: jains_fairness_index(&routed),
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = Self::fresh_state(self.num_workers);
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Coefficient of variation (std / mean).
pub fn coefficient_of_variation(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<u64>() as f64 / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    variance.sqrt() / mean
}

/// Jain's fairness index: (sum(x_i))^2 / (n * sum(x_i^2)).
pub fn jains_fairness_index(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    let n = values.len() as f64;
    let sum: f64 = values.iter().map(|&v| v as f64).sum();
    let sum_sq: f64 = values.iter().map(|&v| (v as f64).powi(2)).sum();
    if sum_sq == 0.0 {
        return 1.0;
    }
    (sum * sum) / (n * sum_sq)
}

/// Everything a benchmark run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub algorithm: String,
    pub eviction_policy: String,
    pub requests_routed: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    /// Virtual time from first arrival to last completion.
    pub duration_ms: u64,
    pub metrics: MetricsSnapshot,
    pub cache: CacheStats,
    pub workers: Vec<WorkerStats>,
    pub custom_metrics: HashMap<String, f64>,
}

/// Format a report as a pretty-printed table string.
pub fn format_table(report: &BenchmarkReport) -> String {
    let m = &report.metrics;
    let mut out = String::new();
    out.push_str(&format!(
        "\n{:=<70}\n",
        format!("  {} Results  ", report.algorithm)
    ));
    out.push_str(&format!(
        "  Duration: {:.1}s | Routed: {} | Completed: {} | Failed: {}\n",
        report.duration_ms as f64 / 1000.0,
        report.requests_routed,
        report.requests_completed,
        report.requests_failed,
    ));
    out.push_str(&format!("{:-<70}\n", "  Cache  "));
    out.push_str(&format!(
        "  Window hit rate: {:.1}%  Token reuse: {:.1}%  Request hits: {:.1}%\n",
        m.window_hit_rate * 100.0,
        m.token_reuse_rate * 100.0,
        m.request_hit_rate * 100.0,
    ));
    out.push_str(&format!(
        "  Unique blocks: {}  Trie nodes: {}  Evictions: {} ({}, {} expired)\n",
        report.cache.unique_blocks,
        report.cache.trie_nodes,
        report.cache.evictions,
        report.eviction_policy,
        report.cache.expired_evictions,
    ));
    out.push_str(&format!(
        "  Prefix (tokens) P50={:>8.1}  P90={:>8.1}  P99={:>8.1}\n",
        m.prefix_tokens.p50, m.prefix_tokens.p90, m.prefix_tokens.p99
    ));
    out.push_str(&format!("{:-<70}\n", "  Workers  "));
    for (w, stats) in m.per_worker.iter().zip(report.workers.iter()) {
        out.push_str(&format!(
            "  worker {:>3}: routed={:>7} hit_tokens={:>9} evictions={:>6} blocks={}/{}\n",
            w.worker_id,
            w.routed,
            w.hit_tokens,
            w.evictions,
            stats.cached_blocks,
            stats.capacity_blocks,
        ));
    }
    if !m.per_endpoint.is_empty() {
        out.push_str(&format!("{:-<70}\n", "  Endpoints  "));
        for (name, e) in &m.per_endpoint {
            out.push_str(&format!(
                "  {:<24} requests={:>7} hit rate={:>5.1}%\n",
                name,
                e.requests,
                e.hit_rate() * 100.0,
            ));
        }
    }
    out.push_str(&format!("{:-<70}\n", "  Fairness  "));
    out.push_str(&format!(
        "  Load CV: {:.3}  Jain's index: {:.4}\n",
        m.load_cv, m.jains_fairness_index,
    ));
    out.push_str(&format!("{:=<70}\n", ""));
    out
}

/// Format a comparison table of multiple algorithm results.
pub fn format_comparison_table(results: &[BenchmarkReport]) -> String {
    if results.is_empty() {
        return String::from("No results to compare.\n");
    }

    let mut out = String::new();
    out.push_str(&format!("\n{:=<84}\n", "  Algorithm Comparison  "));
    out.push_str(&format!(
        "{:<16} {:>9} {:>9} {:>9} {:>10} {:>10} {:>8} {:>8}\n",
        "Algorithm", "Window%", "Reuse%", "ReqHit%", "Prefix p50", "Evictions", "CV", "Jain's"
    ));
    out.push_str(&format!("{:-<84}\n", ""));

    for r in results {
        let m = &r.metrics;
        out.push_str(&format!(
            "{:<16} {:>8.1}% {:>8.1}% {:>8.1}% {:>10.1} {:>10} {:>8.3} {:>8.4}\n",
            r.algorithm,
            m.window_hit_rate * 100.0,
            m.token_reuse_rate * 100.0,
            m.request_hit_rate * 100.0,
            m.prefix_tokens.p50,
            r.cache.evictions,
            m.load_cv,
            m.jains_fairness_index,
        ));
    }
    out.push_str(&format!("{:=<84}\n", ""));
    out
}
