//! Request model for replay.
//!
//! A [`TokenizedRequest`] is one call as seen by the router: the prompt's
//! token ids plus how long the simulated worker stays busy with it.

use crate::block::TokenId;
use serde::{Deserialize, Serialize};

pub const DEFAULT_HOLD_MS: u64 = 1000;

/// A single tokenized request flowing through the simulated cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizedRequest {
    /// Unique request identifier.
    pub id: u64,
    /// Arrival time in simulation milliseconds.
    pub arrival_time_ms: u64,
    /// Prompt token ids from the external tokenizer.
    pub tokens: Vec<TokenId>,
    /// How long the worker holds the request before completion.
    pub hold_ms: u64,
    /// Label for per-endpoint metrics.
    pub endpoint: Option<String>,
}

impl TokenizedRequest {
    pub fn new(id: u64, arrival_time_ms: u64, tokens: Vec<TokenId>) -> Self {
        Self {
            id,
            arrival_time_ms,
            tokens,
            hold_ms: DEFAULT_HOLD_MS,
            endpoint: None,
        }
    }

    pub fn with_hold_ms(mut self, hold_ms: u64) -> Self {
        self.hold_ms = hold_ms;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Time at which the request releases its worker.
    pub fn completion_time_ms(&self) -> u64 {
        self.arrival_time_ms.saturating_add(self.hold_ms)
    }
}
