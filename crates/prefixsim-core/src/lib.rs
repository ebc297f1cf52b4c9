//! prefixsim: prefix-aware cache and smart-routing simulator.
//!
//! This crate models which simulated workers hold which token-sequence
//! prefixes, and routes each incoming request to the worker with the best
//! trade-off between cache reuse and load. Routing algorithms from
//! `prefixsim-algorithms` are plugged into the router's scoring step.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐     ┌───────────┐     ┌──────────────┐
//! │  Trace   │────▶│  Replay   │────▶│   Metrics    │
//! │ Ingestion│     │  Engine   │     │  (observer)  │
//! └──────────┘     └─────┬─────┘     └──────▲───────┘
//!                        │                  │
//!                ┌───────▼───────┐          │
//!                │ Smart Router  │──────────┘
//!                │  (Algorithm)  │
//!                └───┬───────┬───┘
//!                    │       │
//!          ┌─────────▼──┐ ┌──▼──────────────┐
//!          │   Cache    │ │ Worker Registry │
//!          │  Manager   │ │   (atomics)     │
//!          │ trie+arena │ └─────────────────┘
//!          └────────────┘
//! ```

pub mod block;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod eviction;
pub mod metrics;
pub mod registry;
pub mod request;
pub mod router;
pub mod trace;
pub mod trie;

// Re-export key types for convenience.
pub use block::{chunk_tokens, BlockHash, LocalBlockHash, TokenBlock, TokenId};
pub use cache::{CacheConfig, CacheManager, CacheStats, EvictionEvent, EvictionReason, RecordOutcome};
pub use clock::{Clock, SimClock, SystemClock};
pub use config::{ConfigError, SimConfig};
pub use engine::{ReplayEngine, ReplayEvent};
pub use eviction::EvictionPolicy;
pub use metrics::{BenchmarkReport, MetricsSnapshot, RoutingMetrics};
pub use registry::{LoadScoreConfig, WorkerRegistry};
pub use request::TokenizedRequest;
pub use router::{RouterConfig, RouterError, RoutingDecision, SmartRouter, WorkerStats};
pub use trace::{generate_synthetic, load_trace, write_jsonl_file, SyntheticConfig, TraceError};
pub use trie::{CacheOverlap, PrefixTrie};

use std::path::{Path, PathBuf};

/// Replay `requests` through a router built from `config` around `algorithm`.
pub fn run_simulation(
    config: &SimConfig,
    requests: Vec<TokenizedRequest>,
    algorithm: Box<dyn prefixsim_algorithms::RoutingAlgorithm>,
) -> Result<BenchmarkReport, ConfigError> {
    let mut engine = ReplayEngine::from_config(config, algorithm)?;
    engine.load_trace(requests);
    Ok(engine.run())
}

/// Run multiple algorithms on the same trace and config. Unknown names are skipped.
pub fn compare_algorithms(
    config: &SimConfig,
    requests: &[TokenizedRequest],
    algorithm_names: &[&str],
) -> Result<Vec<BenchmarkReport>, ConfigError> {
    let weights = config.cost_weights();
    let mut reports = Vec::with_capacity(algorithm_names.len());
    for name in algorithm_names {
        let Some(algo) = prefixsim_algorithms::algorithm_with_weights(name, weights) else {
            tracing::warn!(algorithm = %name, "unknown algorithm skipped");
            continue;
        };
        reports.push(run_simulation(config, requests.to_vec(), algo)?);
    }
    Ok(reports)
}

/// Requests for a run: the trace file (`override_path` or `trace.path`), or
/// a synthetic trace when the configured format is `synthetic`.
pub fn load_requests(
    config: &SimConfig,
    override_path: Option<&Path>,
) -> Result<Vec<TokenizedRequest>, TraceError> {
    if override_path.is_none() && config.trace.format == "synthetic" {
        return Ok(generate_synthetic(&config.synthetic()));
    }

    let path = override_path
        .map(Path::to_path_buf)
        .or_else(|| config.trace.path.as_ref().map(PathBuf::from))
        .ok_or(TraceError::MissingPath)?;
    let format = if config.trace.format == "synthetic" {
        "jsonl"
    } else {
        config.trace.format.as_str()
    };
    load_trace(&path, format)
}
