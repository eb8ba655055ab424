//! LlmClient trait definition

use async_trait::async_trait;

use super::{Generation, LlmError, Pricing};
use crate::domain::CostRecord;

/// Stateless text-generation engine
///
/// Each call is independent; no conversation state is kept between calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier reported in cost records
    fn name(&self) -> &str;

    /// Prices used to cost each call
    fn pricing(&self) -> Pricing;

    /// Whether the engine can currently serve requests
    async fn is_available(&self) -> bool;

    /// Generate a completion for a single prompt
    async fn generate(&self, prompt: &str) -> Result<Generation, LlmError>;

    /// Cost record for a call made through this engine
    fn cost_record(&self, input_tokens: u64, output_tokens: u64) -> CostRecord {
        self.pricing().record(input_tokens, output_tokens, self.name())
    }
}
