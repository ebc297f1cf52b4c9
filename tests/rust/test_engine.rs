/// Integration tests for the replay engine.
use prefixsim_algorithms::*;
use prefixsim_core::config::SimConfig;
use prefixsim_core::trace::SyntheticConfig;
use prefixsim_core::{TokenizedRequest, TraceError};

fn cluster_config(algorithm: &str, policy: &str) -> SimConfig {
    SimConfig::from_str(&format!(
        r#"
[simulation]
name = "integration-test"
seed = 42

[cluster]
num_workers = 4
block_size = 16
capacity_blocks = 512

[cluster.eviction]
policy = "{policy}"
ttl_ms = 2000

[routing]
algorithm = "{algorithm}"

[trace]
format = "synthetic"

[trace.synthetic]
requests = 300
rate = 100.0
num_prefixes = 4
prefix_len = 128
suffix_len_mean = 32
turn_probability = 0.8
hold_ms_mean = 200
"#
    ))
    .unwrap()
}

fn workload(config: &SimConfig) -> Vec<TokenizedRequest> {
    prefixsim_core::load_requests(config, None).unwrap()
}

#[test]
fn test_full_replay_kv_aware() {
    let config = cluster_config("kv_aware", "lru");
    let requests = workload(&config);
    assert_eq!(requests.len(), 300);

    let algo = algorithm_with_weights("kv_aware", config.cost_weights()).unwrap();
    let report = prefixsim_core::run_simulation(&config, requests, algo).unwrap();

    assert_eq!(report.requests_routed, 300);
    assert_eq!(report.requests_completed, 300);
    assert_eq!(report.requests_failed, 0);
    assert_eq!(report.metrics.total_requests, 300);
    assert!(report.metrics.hit_tokens > 0);
    assert!(report.duration_ms > 0);
    assert!(report.workers.iter().all(|w| w.active_requests == 0));
    assert!(report.workers.iter().all(|w| w.cached_blocks <= 512));
}

#[test]
fn test_every_algorithm_and_policy_replays() {
    for policy in ["lru", "lfu", "ttl"] {
        let config = cluster_config("kv_aware", policy);
        let requests = workload(&config);
        for name in available_algorithms() {
            let algo = algorithm_by_name(name).unwrap();
            let report =
                prefixsim_core::run_simulation(&config, requests.clone(), algo).unwrap();
            assert_eq!(
                report.requests_routed, 300,
                "{} under {} routed {}",
                name, policy, report.requests_routed
            );
            assert_eq!(report.eviction_policy, policy);
        }
    }
}

#[test]
fn test_cache_aware_routing_reuses_more_than_round_robin() {
    let config = cluster_config("kv_aware", "lru");
    let requests = workload(&config);
    let results =
        prefixsim_core::compare_algorithms(&config, &requests, &["kv_aware", "round_robin"])
            .unwrap();

    let kv = &results[0].metrics;
    let rr = &results[1].metrics;
    assert!(
        kv.token_reuse_rate > rr.token_reuse_rate,
        "kv_aware reuse {:.3} <= round_robin reuse {:.3}",
        kv.token_reuse_rate,
        rr.token_reuse_rate
    );
}

#[test]
fn test_compare_skips_unknown_algorithms() {
    let config = cluster_config("kv_aware", "lru");
    let requests = workload(&config);
    let results = prefixsim_core::compare_algorithms(
        &config,
        &requests,
        &["round_robin", "no_such_algorithm", "least_loaded"],
    )
    .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].algorithm, "round_robin");
    assert_eq!(results[1].algorithm, "least_loaded");
}

#[test]
fn test_missing_trace_path() {
    let config = SimConfig::from_str(
        r#"
[cluster]
num_workers = 2
"#,
    )
    .unwrap();
    let err = prefixsim_core::load_requests(&config, None).unwrap_err();
    assert!(matches!(err, TraceError::MissingPath));
}

#[test]
fn test_synthetic_seed_comes_from_simulation_section() {
    let config = cluster_config("kv_aware", "lru");
    let expected = prefixsim_core::generate_synthetic(&SyntheticConfig {
        seed: 42,
        ..config.trace.synthetic.clone()
    });
    assert_eq!(workload(&config), expected);
}

#[test]
fn test_report_formatting() {
    let config = cluster_config("kv_aware", "lru");
    let requests: Vec<TokenizedRequest> = workload(&config).into_iter().take(20).collect();
    let algo = algorithm_by_name("kv_aware").unwrap();
    let report = prefixsim_core::run_simulation(&config, requests, algo).unwrap();

    let table = prefixsim_core::metrics::format_table(&report);
    assert!(table.contains("kv_aware"));
    assert!(table.contains("Window hit rate"));
    assert!(table.contains("Jain's index"));

    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"eviction_policy\":\"lru\""));
}
