//! Trace ingestion and synthetic trace generation.
//!
//! Traces are JSONL: one request per line with its arrival time and token
//! ids. The synthetic generator produces the same shape from a seed, with
//! shared system prompts and multi-turn conversations so prefix reuse is
//! realistic.

use crate::block::TokenId;
use crate::request::{TokenizedRequest, DEFAULT_HOLD_MS};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to read trace file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse JSON at line {line}: {source}")]
    JsonParse {
        line: usize,
        source: serde_json::Error,
    },
    #[error("Failed to write trace record: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Unsupported trace format: {0}")]
    UnsupportedFormat(String),
    #[error("No trace file specified. Use --trace or set trace.path in config.")]
    MissingPath,
}

/// One JSONL trace line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Arrival timestamp in milliseconds.
    pub ts: u64,
    pub tokens: Vec<TokenId>,
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_hold_ms() -> u64 {
    DEFAULT_HOLD_MS
}

impl From<&TokenizedRequest> for TraceRecord {
    fn from(req: &TokenizedRequest) -> Self {
        Self {
            ts: req.arrival_time_ms,
            tokens: req.tokens.clone(),
            hold_ms: req.hold_ms,
            endpoint: req.endpoint.clone(),
        }
    }
}

/// Load a trace from a file in the given format.
pub fn load_trace(path: &Path, format: &str) -> Result<Vec<TokenizedRequest>, TraceError> {
    match format {
        "jsonl" => load_jsonl(path),
        other => Err(TraceError::UnsupportedFormat(other.to_string())),
    }
}

pub fn load_jsonl(path: &Path) -> Result<Vec<TokenizedRequest>, TraceError> {
    let file = std::fs::File::open(path)?;
    parse_jsonl(BufReader::new(file))
}

/// Parse JSONL from any reader. Blank lines and `#` comments are skipped;
/// requests come back sorted by arrival time and numbered in file order.
pub fn parse_jsonl<R: Read>(reader: BufReader<R>) -> Result<Vec<TokenizedRequest>, TraceError> {
    let mut requests = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record: TraceRecord =
            serde_json::from_str(trimmed).map_err(|e| TraceError::JsonParse {
                line: line_num + 1,
                source: e,
            })?;
        requests.push(TokenizedRequest {
            id: requests.len() as u64,
            arrival_time_ms: record.ts,
            tokens: record.tokens,
            hold_ms: record.hold_ms,
            endpoint: record.endpoint,
        });
    }

    // Stable: equal timestamps keep file order.
    requests.sort_by_key(|r| r.arrival_time_ms);
    Ok(requests)
}

pub fn write_jsonl<W: Write>(requests: &[TokenizedRequest], mut writer: W) -> Result<(), TraceError> {
    for req in requests {
        serde_json::to_writer(&mut writer, &TraceRecord::from(req)).map_err(TraceError::Serialize)?;
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_jsonl_file(requests: &[TokenizedRequest], path: &Path) -> Result<(), TraceError> {
    let file = std::fs::File::create(path)?;
    write_jsonl(requests, std::io::BufWriter::new(file))
}

/// Parameters of the synthetic workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub requests: usize,
    /// Arrival rate in requests per second.
    pub rate: f64,
    /// Distinct shared system prompts.
    pub num_prefixes: u32,
    pub prefix_len: u32,
    /// Mean length of the per-request suffix; actual lengths are uniform in `1..=2*mean`.
    pub suffix_len_mean: u32,
    /// Chance that a request continues an earlier conversation.
    pub turn_probability: f64,
    /// Mean hold time; actual holds are uniform in `mean/2..=3*mean/2`.
    pub hold_ms_mean: u64,
    pub vocab_size: u32,
    /// Conversations longer than this start over from a system prompt.
    pub max_prompt_tokens: usize,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            requests: 1000,
            rate: 50.0,
            num_prefixes: 8,
            prefix_len: 256,
            suffix_len_mean: 64,
            turn_probability: 0.4,
            hold_ms_mean: DEFAULT_HOLD_MS,
            vocab_size: 32_000,
            max_prompt_tokens: 4096,
            seed: 42,
        }
    }
}

const CHAT_ENDPOINT: &str = "/v1/chat/completions";
const COMPLETION_ENDPOINT: &str = "/v1/completions";

/// Generate a reproducible synthetic trace.
pub fn generate_synthetic(config: &SyntheticConfig) -> Vec<TokenizedRequest> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let vocab = config.vocab_size.max(1);

    let prefixes: Vec<Vec<TokenId>> = (0..config.num_prefixes.max(1))
        .map(|_| {
            (0..config.prefix_len)
                .map(|_| rng.gen_range(0..vocab))
                .collect()
        })
        .collect();

    let mut conversations: Vec<Vec<TokenId>> = Vec::new();
    let rate = if config.rate > 0.0 { config.rate } else { 1.0 };
    let mut requests = Vec::with_capacity(config.requests);

    for i in 0..config.requests {
        let arrival_time_ms = (i as f64 / rate * 1000.0) as u64;
        let suffix_len = rng.gen_range(1..=config.suffix_len_mean.max(1) * 2);
        let suffix: Vec<TokenId> = (0..suffix_len).map(|_| rng.gen_range(0..vocab)).collect();

        let continue_turn = !conversations.is_empty() && rng.gen_bool(config.turn_probability.clamp(0.0, 1.0));
        let (tokens, endpoint) = if continue_turn {
            let idx = rng.gen_range(0..conversations.len());
            let mut tokens = conversations[idx].clone();
            tokens.extend_from_slice(&suffix);
            if tokens.len() > config.max_prompt_tokens {
                conversations.swap_remove(idx);
                let prefix = &prefixes[rng.gen_range(0..prefixes.len())];
                let mut fresh = prefix.clone();
                fresh.extend_from_slice(&suffix);
                (fresh, COMPLETION_ENDPOINT)
            } else {
                conversations[idx] = tokens.clone();
                (tokens, CHAT_ENDPOINT)
            }
        } else {
            let prefix = &prefixes[rng.gen_range(0..prefixes.len())];
            let mut tokens = prefix.clone();
            tokens.extend_from_slice(&suffix);
            conversations.push(tokens.clone());
            (tokens, CHAT_ENDPOINT)
        };

        let half = (config.hold_ms_mean / 2).max(1);
        let hold_ms = rng.gen_range(half..=config.hold_ms_mean.max(1) + half);

        requests.push(TokenizedRequest {
            id: i as u64,
            arrival_time_ms,
            tokens,
            hold_ms,
            endpoint: Some(endpoint.to_string()),
        });
    }

    requests
}
