//! Worker selection algorithms for prefixsim.
//!
//! This crate provides the [`RoutingAlgorithm`] trait used by the smart
//! router's scoring step, and the built-in implementations:
//!
//! | Algorithm | Strategy | Role |
//! |-----------|----------|------|
//! | [`KvAware`] | Prefill + decode + load cost | Default smart routing |
//! | [`LeastLoaded`] | Lowest load score | Cache-oblivious baseline |
//! | [`RoundRobin`] | Cycle through workers | Hit-rate floor |

pub mod kv_aware;
pub mod least_loaded;
pub mod round_robin;
pub mod traits;

pub use kv_aware::KvAware;
pub use least_loaded::LeastLoaded;
pub use round_robin::RoundRobin;
pub use traits::*;

/// Create a routing algorithm by name with default cost weights.
pub fn algorithm_by_name(name: &str) -> Option<Box<dyn RoutingAlgorithm>> {
    algorithm_with_weights(name, CostWeights::default())
}

/// Create a routing algorithm by name with explicit cost weights.
pub fn algorithm_with_weights(
    name: &str,
    weights: CostWeights,
) -> Option<Box<dyn RoutingAlgorithm>> {
    match name {
        "kv_aware" => Some(Box::new(KvAware::with_weights(weights))),
        "least_loaded" => Some(Box::new(LeastLoaded::with_weights(weights))),
        "round_robin" => Some(Box::new(RoundRobin::with_weights(weights))),
        _ => None,
    }
}

/// List all available built-in algorithm names.
pub fn available_algorithms() -> Vec<&'static str> {
    vec!["kv_aware", "least_loaded", "round_robin"]
}
