//! Engine result and pricing types

use serde::{Deserialize, Serialize};

use crate::domain::CostRecord;

/// Text produced by one engine call plus its token usage
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Per-1000-token prices in USD
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Pricing {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Cost of a call in USD
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_per_1k + (output_tokens as f64 / 1000.0) * self.output_per_1k
    }

    /// Cost record for a call against the named model
    pub fn record(&self, input_tokens: u64, output_tokens: u64, model_name: &str) -> CostRecord {
        CostRecord::new(
            input_tokens,
            output_tokens,
            self.cost(input_tokens, output_tokens),
            model_name,
        )
    }
}

/// Rough token estimate used when an engine does not report usage
///
/// One token per four characters, plus one.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 4 + 1) as u64
}
