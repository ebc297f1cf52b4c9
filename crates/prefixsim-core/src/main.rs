//! prefixsim CLI: replay traces through the prefix-aware smart router.

use clap::{Parser, Subcommand};
use prefixsim_core::config::SimConfig;
use prefixsim_core::metrics;
use prefixsim_core::trace::{self, SyntheticConfig};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "prefixsim",
    about = "Simulate prefix-aware caching and smart routing for LLM serving",
    version
)]
struct Cli {
    /// Debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Errors only.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a trace with a single algorithm.
    Run {
        /// Path to TOML configuration file.
        #[arg(short, long)]
        config: PathBuf,
        /// Path to trace file (overrides trace.path).
        #[arg(short, long)]
        trace: Option<PathBuf>,
        /// Routing algorithm name (overrides routing.algorithm).
        #[arg(short, long)]
        algorithm: Option<String>,
        /// Output results to JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the report as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Compare multiple algorithms on the same trace.
    Compare {
        /// Path to TOML configuration file.
        #[arg(short, long)]
        config: PathBuf,
        /// Path to trace file (overrides trace.path).
        #[arg(short, long)]
        trace: Option<PathBuf>,
        /// Comma-separated list of algorithm names.
        #[arg(short = 'A', long, value_delimiter = ',')]
        algorithms: Vec<String>,
        /// Output results to JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Generate a synthetic JSONL trace.
    GenTrace {
        /// Number of requests.
        #[arg(long, default_value = "1000")]
        requests: usize,
        /// Request rate (requests/sec).
        #[arg(long, default_value = "50")]
        rate: f64,
        /// Number of shared system prompts.
        #[arg(long, default_value = "8")]
        prefixes: u32,
        /// System prompt length in tokens.
        #[arg(long, default_value = "256")]
        prefix_len: u32,
        /// Mean per-request suffix length in tokens.
        #[arg(long, default_value = "64")]
        suffix_mean: u32,
        /// Probability that a request continues an earlier conversation.
        #[arg(long, default_value = "0.4")]
        turn_prob: f64,
        /// Mean hold time in ms.
        #[arg(long, default_value = "1000")]
        hold_ms: u64,
        /// Random seed.
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Output file path.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List available algorithms.
    ListAlgorithms,
}

fn setup_logging(verbose: bool, quiet: bool) {
    let log_level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    let filter = if verbose || quiet {
        EnvFilter::new(log_level.to_string())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Run {
            config,
            trace: trace_path,
            algorithm,
            output,
            json,
        } => {
            let sim_config = load_config(&config);
            let requests = load_requests(&sim_config, trace_path.as_deref());

            let name = algorithm.unwrap_or_else(|| sim_config.routing.algorithm.clone());
            let algo = prefixsim_algorithms::algorithm_with_weights(&name, sim_config.cost_weights())
                .unwrap_or_else(|| {
                    eprintln!(
                        "Unknown algorithm: {}. Available: {:?}",
                        name,
                        prefixsim_algorithms::available_algorithms()
                    );
                    std::process::exit(1);
                });

            let result = prefixsim_core::run_simulation(&sim_config, requests, algo)
                .unwrap_or_else(|e| {
                    eprintln!("Error building router: {}", e);
                    std::process::exit(1);
                });

            if json {
                println!("{}", to_json(&result));
            } else {
                println!("{}", metrics::format_table(&result));
            }

            if let Some(output_path) = output {
                write_output(&output_path, &to_json(&result));
            }
        }
        Commands::Compare {
            config,
            trace: trace_path,
            algorithms,
            output,
        } => {
            let sim_config = load_config(&config);
            let requests = load_requests(&sim_config, trace_path.as_deref());
            let algo_names: Vec<&str> = if algorithms.is_empty() {
                prefixsim_algorithms::available_algorithms()
            } else {
                algorithms.iter().map(|s| s.as_str()).collect()
            };

            let results = prefixsim_core::compare_algorithms(&sim_config, &requests, &algo_names)
                .unwrap_or_else(|e| {
                    eprintln!("Error building router: {}", e);
                    std::process::exit(1);
                });
            println!("{}", metrics::format_comparison_table(&results));

            for result in &results {
                println!("{}", metrics::format_table(result));
            }

            if let Some(output_path) = output {
                write_output(&output_path, &to_json(&results));
            }
        }
        Commands::GenTrace {
            requests,
            rate,
            prefixes,
            prefix_len,
            suffix_mean,
            turn_prob,
            hold_ms,
            seed,
            output,
        } => {
            let generated = trace::generate_synthetic(&SyntheticConfig {
                requests,
                rate,
                num_prefixes: prefixes,
                prefix_len,
                suffix_len_mean: suffix_mean,
                turn_probability: turn_prob,
                hold_ms_mean: hold_ms,
                seed,
                ..Default::default()
            });

            trace::write_jsonl_file(&generated, &output).unwrap_or_else(|e| {
                eprintln!("Error writing trace: {}", e);
                std::process::exit(1);
            });
            println!(
                "Generated {} requests to {}",
                generated.len(),
                output.display()
            );
        }
        Commands::ListAlgorithms => {
            println!("Available routing algorithms:");
            for name in prefixsim_algorithms::available_algorithms() {
                println!("  - {}", name);
            }
        }
    }
}

fn load_config(path: &Path) -> SimConfig {
    SimConfig::from_file(path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    })
}

fn load_requests(config: &SimConfig, trace_path: Option<&Path>) -> Vec<prefixsim_core::TokenizedRequest> {
    prefixsim_core::load_requests(config, trace_path).unwrap_or_else(|e| {
        eprintln!("Error loading trace: {}", e);
        std::process::exit(1);
    })
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        eprintln!("Error serializing results: {}", e);
        std::process::exit(1);
    })
}

fn write_output(path: &Path, json: &str) {
    std::fs::write(path, json).unwrap_or_else(|e| {
        eprintln!("Error writing output: {}", e);
        std::process::exit(1);
    });
    println!("Results written to {}", path.display());
}

