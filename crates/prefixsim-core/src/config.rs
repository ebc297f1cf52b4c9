//! TOML configuration parsing for prefixsim.
//!
//! Defines the configuration schema for simulation runs: cluster geometry,
//! eviction policy, routing weights and the trace source.

use crate::cache::CacheConfig;
use crate::eviction::EvictionPolicy;
use crate::registry::LoadScoreConfig;
use crate::router::RouterConfig;
use crate::trace::SyntheticConfig;
use prefixsim_algorithms::CostWeights;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub simulation: SimulationSection,
    pub cluster: ClusterSection,
    #[serde(default)]
    pub routing: RoutingSection,
    #[serde(default)]
    pub trace: TraceSection,
}

/// General simulation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSection {
    /// Human-readable name for this simulation.
    #[serde(default = "default_sim_name")]
    pub name: String,
    /// Random seed for synthetic traces.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Decisions in the metrics sliding window.
    #[serde(default = "default_metrics_window")]
    pub metrics_window: usize,
}

fn default_sim_name() -> String {
    "prefix-sim".to_string()
}

fn default_seed() -> u64 {
    42
}

fn default_metrics_window() -> usize {
    1024
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            name: default_sim_name(),
            seed: default_seed(),
            metrics_window: default_metrics_window(),
        }
    }
}

/// Cluster geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSection {
    /// Number of workers.
    pub num_workers: u32,
    /// Tokens per cache block.
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    /// Resident blocks per worker.
    #[serde(default = "default_capacity_blocks")]
    pub capacity_blocks: usize,
    #[serde(default)]
    pub eviction: EvictionSection,
}

fn default_block_size() -> u32 {
    16
}
fn default_capacity_blocks() -> usize {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionSection {
    /// "lru", "lfu" or "ttl".
    #[serde(default = "default_eviction_policy")]
    pub policy: String,
    /// Block lifetime for the ttl policy.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_eviction_policy() -> String {
    "lru".to_string()
}
fn default_ttl_ms() -> u64 {
    60_000
}

impl Default for EvictionSection {
    fn default() -> Self {
        Self {
            policy: default_eviction_policy(),
            ttl_ms: default_ttl_ms(),
        }
    }
}

/// Routing algorithm and cost weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSection {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_one")]
    pub kv_overlap_weight: f64,
    #[serde(default = "default_one")]
    pub load_balance_weight: f64,
    #[serde(default = "default_queue_depth_weight")]
    pub queue_depth_weight: f64,
    #[serde(default = "default_one")]
    pub decode_blocks: f64,
}

fn default_algorithm() -> String {
    "kv_aware".to_string()
}
fn default_one() -> f64 {
    1.0
}
fn default_queue_depth_weight() -> f64 {
    0.5
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            kv_overlap_weight: default_one(),
            load_balance_weight: default_one(),
            queue_depth_weight: default_queue_depth_weight(),
            decode_blocks: default_one(),
        }
    }
}

/// Trace source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSection {
    /// Format: "jsonl" or "synthetic".
    #[serde(default = "default_trace_format")]
    pub format: String,
    /// Path to the trace file (jsonl).
    pub path: Option<String>,
    /// Generator parameters (synthetic). The seed comes from `[simulation]`.
    #[serde(default)]
    pub synthetic: SyntheticConfig,
}

fn default_trace_format() -> String {
    "jsonl".to_string()
}

impl Default for TraceSection {
    fn default() -> Self {
        Self {
            format: default_trace_format(),
            path: None,
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl SimConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.num_workers == 0 {
            return Err(ConfigError::Validation(
                "num_workers must be > 0".to_string(),
            ));
        }
        if self.cluster.block_size == 0 {
            return Err(ConfigError::Validation(
                "block_size must be > 0".to_string(),
            ));
        }
        if self.cluster.capacity_blocks == 0 {
            return Err(ConfigError::Validation(
                "capacity_blocks must be > 0".to_string(),
            ));
        }
        if self.simulation.metrics_window == 0 {
            return Err(ConfigError::Validation(
                "metrics_window must be > 0".to_string(),
            ));
        }

        let policy = self.eviction_policy()?;
        if policy.ttl_ms() == Some(0) {
            return Err(ConfigError::Validation(
                "ttl_ms must be > 0 when policy is ttl".to_string(),
            ));
        }

        let weights = [
            ("kv_overlap_weight", self.routing.kv_overlap_weight),
            ("load_balance_weight", self.routing.load_balance_weight),
            ("queue_depth_weight", self.routing.queue_depth_weight),
            ("decode_blocks", self.routing.decode_blocks),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "{} must be finite and >= 0, got {}",
                    name, value
                )));
            }
        }

        if !prefixsim_algorithms::available_algorithms().contains(&self.routing.algorithm.as_str())
        {
            return Err(ConfigError::Validation(format!(
                "Unknown algorithm '{}'. Available: {:?}",
                self.routing.algorithm,
                prefixsim_algorithms::available_algorithms()
            )));
        }

        let synthetic = &self.trace.synthetic;
        if !synthetic.turn_probability.is_finite()
            || !(0.0..=1.0).contains(&synthetic.turn_probability)
        {
            return Err(ConfigError::Validation(format!(
                "trace.synthetic.turn_probability must be in [0, 1], got {}",
                synthetic.turn_probability
            )));
        }
        if !synthetic.rate.is_finite() || synthetic.rate <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "trace.synthetic.rate must be finite and > 0, got {}",
                synthetic.rate
            )));
        }

        match self.trace.format.as_str() {
            "jsonl" | "synthetic" => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "Unsupported trace format '{}'",
                other
            ))),
        }
    }

    pub fn eviction_policy(&self) -> Result<EvictionPolicy, ConfigError> {
        let eviction = &self.cluster.eviction;
        EvictionPolicy::from_name(&eviction.policy, eviction.ttl_ms).ok_or_else(|| {
            ConfigError::Validation(format!(
                "Unknown eviction policy '{}'. Expected lru, lfu or ttl",
                eviction.policy
            ))
        })
    }

    pub fn cost_weights(&self) -> CostWeights {
        CostWeights {
            kv_overlap_weight: self.routing.kv_overlap_weight,
            load_balance_weight: self.routing.load_balance_weight,
            decode_blocks: self.routing.decode_blocks,
        }
    }

    /// Everything the smart router needs.
    pub fn router_config(&self) -> Result<RouterConfig, ConfigError> {
        Ok(RouterConfig {
            cache: CacheConfig {
                block_size: self.cluster.block_size,
                capacity_blocks: self.cluster.capacity_blocks,
                eviction: self.eviction_policy()?,
            },
            weights: self.cost_weights(),
            load: LoadScoreConfig {
                queue_depth_weight: self.routing.queue_depth_weight,
            },
            metrics_window: self.simulation.metrics_window,
        })
    }

    /// Synthetic generator parameters seeded from `[simulation]`.
    pub fn synthetic(&self) -> SyntheticConfig {
        SyntheticConfig {
            seed: self.simulation.seed,
            ..self.trace.synthetic.clone()
        }
    }
}
